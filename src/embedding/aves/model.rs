use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use burn_store::{BurnpackStore, ModuleSnapshot, PytorchStore};
use tracing::{info, warn};

use super::backend::{
    AvesCpuBackend, AvesCpuDevice, AvesWgpuBackend, AvesWgpuDevice, init_cubecl_config,
    init_wgpu, resolve_preference,
};
#[cfg(feature = "aves-cuda")]
use super::backend::{AvesCudaBackend, AvesCudaDevice};
use super::config::AvesConfig;
use super::encoder::AvesEncoder;
use crate::embedding::{BackendPreference, EmbedError, Embedder, mean_pool};

enum AvesModelInner {
    Wgpu {
        encoder: AvesEncoder<AvesWgpuBackend>,
        device: AvesWgpuDevice,
    },
    Cpu {
        encoder: AvesEncoder<AvesCpuBackend>,
        device: AvesCpuDevice,
    },
    #[cfg(feature = "aves-cuda")]
    Cuda {
        encoder: AvesEncoder<AvesCudaBackend>,
        device: AvesCudaDevice,
    },
}

/// Pretrained AVES encoder bound to a compute backend.
pub struct AvesModel {
    inner: AvesModelInner,
    config: AvesConfig,
    sample_rate: u32,
}

impl AvesModel {
    /// Load the JSON config and weights onto the preferred backend.
    ///
    /// `.pt`/`.pth` files are read as PyTorch state dicts; anything else is
    /// treated as a burnpack.
    pub fn load(
        config_path: &Path,
        weights_path: &Path,
        sample_rate: u32,
        preference: BackendPreference,
    ) -> Result<Self, EmbedError> {
        let config = AvesConfig::from_file(config_path)?;
        if !weights_path.is_file() {
            return Err(EmbedError::Weights {
                path: weights_path.to_path_buf(),
                message: "file not found".to_string(),
            });
        }
        let inner = match resolve_preference(preference) {
            BackendPreference::Cpu => load_cpu(&config, weights_path)?,
            BackendPreference::Wgpu => load_wgpu(&config, weights_path)?,
            BackendPreference::Auto => match load_wgpu(&config, weights_path) {
                Ok(inner) => inner,
                Err(EmbedError::Backend(message)) => {
                    warn!("WGPU backend unavailable ({message}); falling back to CPU.");
                    load_cpu(&config, weights_path)?
                }
                Err(err) => return Err(err),
            },
            #[cfg(feature = "aves-cuda")]
            BackendPreference::Cuda => {
                let device = AvesCudaDevice::default();
                let encoder = load_encoder::<AvesCudaBackend>(&config, weights_path, &device)?;
                AvesModelInner::Cuda { encoder, device }
            }
        };
        let model = Self {
            inner,
            config,
            sample_rate: sample_rate.max(1),
        };
        info!(
            "Loaded AVES encoder ({} layers, dim {}) on {}",
            model.config.encoder_num_layers,
            model.config.encoder_embed_dim,
            model.backend_name()
        );
        Ok(model)
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner {
            AvesModelInner::Wgpu { .. } => "wgpu",
            AvesModelInner::Cpu { .. } => "cpu",
            #[cfg(feature = "aves-cuda")]
            AvesModelInner::Cuda { .. } => "cuda",
        }
    }

    pub fn config(&self) -> &AvesConfig {
        &self.config
    }
}

impl Embedder for AvesModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn embedding_dim(&self) -> usize {
        self.config.encoder_embed_dim
    }

    fn embed(&mut self, samples: &[f32]) -> Result<Vec<f32>, EmbedError> {
        let min_samples = self.config.min_samples();
        if samples.len() < min_samples {
            return Err(EmbedError::TooShort {
                samples: samples.len(),
                min_samples,
            });
        }
        let pooled = match &self.inner {
            AvesModelInner::Wgpu { encoder, device } => embed_with(encoder, device, samples),
            AvesModelInner::Cpu { encoder, device } => embed_with(encoder, device, samples),
            #[cfg(feature = "aves-cuda")]
            AvesModelInner::Cuda { encoder, device } => embed_with(encoder, device, samples),
        }?;
        if pooled.len() != self.config.encoder_embed_dim {
            return Err(EmbedError::Inference(format!(
                "encoder returned {} values, expected {}",
                pooled.len(),
                self.config.encoder_embed_dim
            )));
        }
        Ok(pooled)
    }
}

fn load_cpu(config: &AvesConfig, weights_path: &Path) -> Result<AvesModelInner, EmbedError> {
    let device = AvesCpuDevice::default();
    let encoder = load_encoder::<AvesCpuBackend>(config, weights_path, &device)?;
    Ok(AvesModelInner::Cpu { encoder, device })
}

fn load_wgpu(config: &AvesConfig, weights_path: &Path) -> Result<AvesModelInner, EmbedError> {
    init_cubecl_config();
    // Adapter discovery panics when no GPU driver is present.
    let attempt = catch_unwind(AssertUnwindSafe(|| {
        let device = AvesWgpuDevice::default();
        init_wgpu(&device);
        load_encoder::<AvesWgpuBackend>(config, weights_path, &device)
            .map(|encoder| AvesModelInner::Wgpu { encoder, device })
    }));
    match attempt {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|text| text.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "WGPU initialization panicked".to_string());
            Err(EmbedError::Backend(message))
        }
    }
}

pub(super) fn load_encoder<B: Backend>(
    config: &AvesConfig,
    weights_path: &Path,
    device: &B::Device,
) -> Result<AvesEncoder<B>, EmbedError> {
    let mut encoder = AvesEncoder::<B>::new(config, device);
    let extension = weights_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let weights_err = |message: String| EmbedError::Weights {
        path: weights_path.to_path_buf(),
        message,
    };
    match extension.as_deref() {
        Some("pt") | Some("pth") => {
            // Newer torch versions store weight norm as parametrizations.
            let mut store = PytorchStore::from_file(weights_path)
                .with_key_remapping(
                    r"\.parametrizations\.weight\.original0$",
                    ".weight_g",
                )
                .with_key_remapping(
                    r"\.parametrizations\.weight\.original1$",
                    ".weight_v",
                );
            encoder
                .load_from(&mut store)
                .map_err(|err| weights_err(format!("{err:?}")))?;
        }
        _ => {
            let mut store = BurnpackStore::from_file(weights_path);
            encoder
                .load_from(&mut store)
                .map_err(|err| weights_err(format!("{err:?}")))?;
        }
    }
    Ok(encoder.no_grad())
}

fn embed_with<B: Backend>(
    encoder: &AvesEncoder<B>,
    device: &B::Device,
    samples: &[f32],
) -> Result<Vec<f32>, EmbedError> {
    let input = Tensor::<B, 2>::from_data(
        TensorData::new(samples.to_vec(), [1, samples.len()]),
        device,
    );
    let pooled = mean_pool(encoder.forward_last_layer(input));
    let data = pooled.into_data();
    let values = data
        .as_slice::<f32>()
        .map_err(|err| EmbedError::Inference(format!("Failed to read encoder output: {err:?}")))?;
    Ok(values.to_vec())
}
