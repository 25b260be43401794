use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbedError;

/// Conv feature extractor used by wav2vec2/HuBERT base models: (channels, kernel, stride).
const DEFAULT_CONV_LAYERS: [(usize, usize, usize); 7] = [
    (512, 10, 5),
    (512, 3, 2),
    (512, 3, 2),
    (512, 3, 2),
    (512, 3, 2),
    (512, 2, 2),
    (512, 2, 2),
];

/// Encoder hyperparameters in the torchaudio `wav2vec2_model` layout.
///
/// Dropout and layer-drop values are accepted so published config files parse
/// unchanged; they have no effect at inference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvesConfig {
    #[serde(default = "default_extractor_mode")]
    pub extractor_mode: String,
    #[serde(default)]
    pub extractor_conv_layer_config: Option<Vec<(usize, usize, usize)>>,
    #[serde(default)]
    pub extractor_conv_bias: bool,
    pub encoder_embed_dim: usize,
    #[serde(default)]
    pub encoder_projection_dropout: f64,
    pub encoder_pos_conv_kernel: usize,
    pub encoder_pos_conv_groups: usize,
    pub encoder_num_layers: usize,
    pub encoder_num_heads: usize,
    #[serde(default)]
    pub encoder_attention_dropout: f64,
    pub encoder_ff_interm_features: usize,
    #[serde(default)]
    pub encoder_ff_interm_dropout: f64,
    #[serde(default)]
    pub encoder_dropout: f64,
    #[serde(default)]
    pub encoder_layer_norm_first: bool,
    #[serde(default)]
    pub encoder_layer_drop: f64,
    #[serde(default)]
    pub aux_num_out: Option<usize>,
}

fn default_extractor_mode() -> String {
    "group_norm".to_string()
}

impl AvesConfig {
    pub fn from_file(path: &Path) -> Result<Self, EmbedError> {
        let bytes = std::fs::read(path).map_err(|source| EmbedError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_slice(&bytes).map_err(|source| EmbedError::Config {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// AVES base (HuBERT base architecture).
    pub fn aves_base() -> Self {
        Self {
            extractor_mode: default_extractor_mode(),
            extractor_conv_layer_config: None,
            extractor_conv_bias: false,
            encoder_embed_dim: 768,
            encoder_projection_dropout: 0.1,
            encoder_pos_conv_kernel: 128,
            encoder_pos_conv_groups: 16,
            encoder_num_layers: 12,
            encoder_num_heads: 12,
            encoder_attention_dropout: 0.1,
            encoder_ff_interm_features: 3072,
            encoder_ff_interm_dropout: 0.0,
            encoder_dropout: 0.1,
            encoder_layer_norm_first: false,
            encoder_layer_drop: 0.05,
            aux_num_out: None,
        }
    }

    pub fn conv_layers(&self) -> Vec<(usize, usize, usize)> {
        self.extractor_conv_layer_config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONV_LAYERS.to_vec())
    }

    /// Shortest waveform that yields at least one encoder frame.
    pub fn min_samples(&self) -> usize {
        self.conv_layers()
            .iter()
            .rev()
            .fold(1usize, |len, (_, kernel, stride)| (len - 1) * stride + kernel)
    }

    /// Number of encoder frames produced for `samples` input samples.
    pub fn frames_for(&self, samples: usize) -> usize {
        self.conv_layers()
            .iter()
            .try_fold(samples, |len, (_, kernel, stride)| {
                (len >= *kernel).then(|| (len - kernel) / stride + 1)
            })
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), EmbedError> {
        if self.extractor_mode != "group_norm" {
            return Err(EmbedError::InvalidConfig(format!(
                "extractor_mode '{}' is not supported; expected 'group_norm'",
                self.extractor_mode
            )));
        }
        let layers = self.conv_layers();
        if layers.is_empty()
            || layers
                .iter()
                .any(|(channels, kernel, stride)| *channels == 0 || *kernel == 0 || *stride == 0)
        {
            return Err(EmbedError::InvalidConfig(
                "extractor_conv_layer_config needs non-zero channels, kernels and strides"
                    .to_string(),
            ));
        }
        let dim = self.encoder_embed_dim;
        if dim == 0 || self.encoder_num_heads == 0 || dim % self.encoder_num_heads != 0 {
            return Err(EmbedError::InvalidConfig(format!(
                "encoder_embed_dim {dim} must be a non-zero multiple of encoder_num_heads {}",
                self.encoder_num_heads
            )));
        }
        if self.encoder_pos_conv_groups == 0 || dim % self.encoder_pos_conv_groups != 0 {
            return Err(EmbedError::InvalidConfig(format!(
                "encoder_embed_dim {dim} must be divisible by encoder_pos_conv_groups {}",
                self.encoder_pos_conv_groups
            )));
        }
        if self.encoder_pos_conv_kernel == 0 || self.encoder_ff_interm_features == 0 {
            return Err(EmbedError::InvalidConfig(
                "positional kernel and feed-forward width must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_torchaudio_config() {
        let json = r#"{
            "extractor_mode": "group_norm",
            "extractor_conv_layer_config": [[512, 10, 5], [512, 3, 2], [512, 3, 2], [512, 3, 2], [512, 3, 2], [512, 2, 2], [512, 2, 2]],
            "extractor_conv_bias": false,
            "encoder_embed_dim": 768,
            "encoder_projection_dropout": 0.1,
            "encoder_pos_conv_kernel": 128,
            "encoder_pos_conv_groups": 16,
            "encoder_num_layers": 12,
            "encoder_num_heads": 12,
            "encoder_attention_dropout": 0.1,
            "encoder_ff_interm_features": 3072,
            "encoder_ff_interm_dropout": 0.0,
            "encoder_dropout": 0.1,
            "encoder_layer_norm_first": false,
            "encoder_layer_drop": 0.05,
            "aux_num_out": null
        }"#;
        let config: AvesConfig = serde_json::from_str(json).unwrap();
        let mut expected = AvesConfig::aves_base();
        expected.extractor_conv_layer_config = Some(DEFAULT_CONV_LAYERS.to_vec());
        assert_eq!(config, expected);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn receptive_field_matches_wav2vec2_frontend() {
        let config = AvesConfig::aves_base();
        assert_eq!(config.min_samples(), 400);
        assert_eq!(config.frames_for(399), 0);
        assert_eq!(config.frames_for(400), 1);
        // One second at 16 kHz gives 49 frames (20 ms hop).
        assert_eq!(config.frames_for(16_000), 49);
    }

    #[test]
    fn layer_norm_extractor_is_rejected() {
        let mut config = AvesConfig::aves_base();
        config.extractor_mode = "layer_norm".to_string();
        assert!(matches!(
            config.validate(),
            Err(EmbedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn heads_must_divide_embed_dim() {
        let mut config = AvesConfig::aves_base();
        config.encoder_num_heads = 7;
        assert!(config.validate().is_err());
    }
}
