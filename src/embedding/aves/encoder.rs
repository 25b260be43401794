//! AVES encoder as burn modules.
//!
//! Field names follow the torchaudio `Wav2Vec2Model` parameter paths so a
//! state dict loads without key remapping, e.g.
//! `encoder.transformer.layers.3.attention.q_proj.weight`.

use burn::module::{Module, Param};
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{GroupNorm, GroupNormConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation::{gelu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::module::conv1d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Distribution, Tensor};

use super::config::AvesConfig;

#[derive(Module, Debug)]
pub struct ConvLayerBlock<B: Backend> {
    conv: Conv1d<B>,
    layer_norm: Option<GroupNorm<B>>,
}

impl<B: Backend> ConvLayerBlock<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.conv.forward(x);
        let x = match &self.layer_norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        gelu(x)
    }
}

/// Strided conv stack turning a waveform into frame features.
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    conv_layers: Vec<ConvLayerBlock<B>>,
}

impl<B: Backend> FeatureExtractor<B> {
    fn new(config: &AvesConfig, device: &B::Device) -> Self {
        let mut in_channels = 1;
        let mut conv_layers = Vec::new();
        for (index, (channels, kernel, stride)) in config.conv_layers().into_iter().enumerate() {
            let conv = Conv1dConfig::new(in_channels, channels, kernel)
                .with_stride(stride)
                .with_bias(config.extractor_conv_bias)
                .init(device);
            // Group-norm mode normalizes the first layer only, one group per channel.
            let layer_norm = (index == 0).then(|| GroupNormConfig::new(channels, channels).init(device));
            conv_layers.push(ConvLayerBlock { conv, layer_norm });
            in_channels = channels;
        }
        Self { conv_layers }
    }

    /// `[batch, samples]` to `[batch, frames, channels]`.
    fn forward(&self, waveform: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, samples] = waveform.dims();
        let mut x = waveform.reshape([batch, 1, samples]);
        for layer in &self.conv_layers {
            x = layer.forward(x);
        }
        x.swap_dims(1, 2)
    }
}

#[derive(Module, Debug)]
pub struct FeatureProjection<B: Backend> {
    layer_norm: LayerNorm<B>,
    projection: Linear<B>,
}

impl<B: Backend> FeatureProjection<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.projection.forward(self.layer_norm.forward(x))
    }
}

/// Grouped conv with weight normalization over every dim except the kernel axis.
#[derive(Module, Debug)]
pub struct WeightNormConv1d<B: Backend> {
    weight_g: Param<Tensor<B, 3>>,
    weight_v: Param<Tensor<B, 3>>,
    bias: Param<Tensor<B, 1>>,
    kernel_size: usize,
    groups: usize,
}

impl<B: Backend> WeightNormConv1d<B> {
    fn new(channels: usize, kernel_size: usize, groups: usize, device: &B::Device) -> Self {
        let fan_in = (channels / groups) * kernel_size;
        let bound = 1.0 / (fan_in as f64).sqrt();
        let weight_v = Tensor::random(
            [channels, channels / groups, kernel_size],
            Distribution::Uniform(-bound, bound),
            device,
        );
        let weight_g = Self::norm(weight_v.clone());
        Self {
            weight_g: Param::from_tensor(weight_g),
            weight_v: Param::from_tensor(weight_v),
            bias: Param::from_tensor(Tensor::zeros([channels], device)),
            kernel_size,
            groups,
        }
    }

    /// `[1, 1, kernel]` L2 norm of `v` per kernel position.
    fn norm(v: Tensor<B, 3>) -> Tensor<B, 3> {
        v.powi_scalar(2).sum_dim(0).sum_dim(1).sqrt()
    }

    fn weight(&self) -> Tensor<B, 3> {
        let v = self.weight_v.val();
        let norm = Self::norm(v.clone());
        v.div(norm).mul(self.weight_g.val())
    }

    /// `[batch, channels, frames]` in, same shape out.
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, channels, frames] = x.dims();
        let padding = self.kernel_size / 2;
        let out = conv1d(
            x,
            self.weight(),
            Some(self.bias.val()),
            ConvOptions::new([1], [padding], [1], self.groups),
        );
        // Even kernels produce one extra frame.
        out.slice([0..batch, 0..channels, 0..frames])
    }
}

#[derive(Module, Debug)]
pub struct ConvolutionalPositionalEmbedding<B: Backend> {
    conv: WeightNormConv1d<B>,
}

impl<B: Backend> ConvolutionalPositionalEmbedding<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.swap_dims(1, 2);
        gelu(self.conv.forward(x)).swap_dims(1, 2)
    }
}

#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    k_proj: Linear<B>,
    v_proj: Linear<B>,
    q_proj: Linear<B>,
    out_proj: Linear<B>,
    num_heads: usize,
}

impl<B: Backend> SelfAttention<B> {
    fn new(embed_dim: usize, num_heads: usize, device: &B::Device) -> Self {
        let linear = || LinearConfig::new(embed_dim, embed_dim).init(device);
        Self {
            k_proj: linear(),
            v_proj: linear(),
            q_proj: linear(),
            out_proj: linear(),
            num_heads,
        }
    }

    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, frames, dim] = x.dims();
        let head_dim = dim / self.num_heads;
        let split = |t: Tensor<B, 3>| {
            t.reshape([batch, frames, self.num_heads, head_dim])
                .swap_dims(1, 2)
        };
        let q = split(self.q_proj.forward(x.clone()));
        let k = split(self.k_proj.forward(x.clone()));
        let v = split(self.v_proj.forward(x));
        let scaling = (head_dim as f64).powf(-0.5);
        let weights = softmax(q.mul_scalar(scaling).matmul(k.swap_dims(2, 3)), 3);
        let out = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, frames, dim]);
        self.out_proj.forward(out)
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    intermediate_dense: Linear<B>,
    output_dense: Linear<B>,
}

impl<B: Backend> FeedForward<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.output_dense
            .forward(gelu(self.intermediate_dense.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    attention: SelfAttention<B>,
    layer_norm: LayerNorm<B>,
    feed_forward: FeedForward<B>,
    final_layer_norm: LayerNorm<B>,
    layer_norm_first: bool,
}

impl<B: Backend> EncoderLayer<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let residual = x.clone();
        let x = if self.layer_norm_first {
            self.layer_norm.forward(x)
        } else {
            x
        };
        let x = residual + self.attention.forward(x);
        if self.layer_norm_first {
            let ff = self
                .feed_forward
                .forward(self.final_layer_norm.forward(x.clone()));
            x + ff
        } else {
            let x = self.layer_norm.forward(x);
            let ff = self.feed_forward.forward(x.clone());
            self.final_layer_norm.forward(x + ff)
        }
    }
}

#[derive(Module, Debug)]
pub struct Transformer<B: Backend> {
    pos_conv_embed: ConvolutionalPositionalEmbedding<B>,
    layer_norm: LayerNorm<B>,
    layers: Vec<EncoderLayer<B>>,
    layer_norm_first: bool,
}

impl<B: Backend> Transformer<B> {
    fn preprocess(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.pos_conv_embed.forward(x);
        if self.layer_norm_first {
            x
        } else {
            self.layer_norm.forward(x)
        }
    }

    fn layer_outputs(&self, x: Tensor<B, 3>) -> Vec<Tensor<B, 3>> {
        let mut x = self.preprocess(x);
        let mut outputs = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            x = layer.forward(x);
            outputs.push(x.clone());
        }
        outputs
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    feature_projection: FeatureProjection<B>,
    transformer: Transformer<B>,
}

/// HuBERT-style encoder: conv front end, projection, transformer stack.
#[derive(Module, Debug)]
pub struct AvesEncoder<B: Backend> {
    feature_extractor: FeatureExtractor<B>,
    encoder: Encoder<B>,
}

impl<B: Backend> AvesEncoder<B> {
    /// Build a randomly initialized encoder; load weights afterwards.
    pub fn new(config: &AvesConfig, device: &B::Device) -> Self {
        let conv_layers = config.conv_layers();
        let extractor_dim = conv_layers.last().map(|(channels, _, _)| *channels).unwrap_or(1);
        let dim = config.encoder_embed_dim;
        let layers = (0..config.encoder_num_layers)
            .map(|_| EncoderLayer {
                attention: SelfAttention::new(dim, config.encoder_num_heads, device),
                layer_norm: LayerNormConfig::new(dim).init(device),
                feed_forward: FeedForward {
                    intermediate_dense: LinearConfig::new(dim, config.encoder_ff_interm_features)
                        .init(device),
                    output_dense: LinearConfig::new(config.encoder_ff_interm_features, dim)
                        .init(device),
                },
                final_layer_norm: LayerNormConfig::new(dim).init(device),
                layer_norm_first: config.encoder_layer_norm_first,
            })
            .collect();
        Self {
            feature_extractor: FeatureExtractor::new(config, device),
            encoder: Encoder {
                feature_projection: FeatureProjection {
                    layer_norm: LayerNormConfig::new(extractor_dim).init(device),
                    projection: LinearConfig::new(extractor_dim, dim).init(device),
                },
                transformer: Transformer {
                    pos_conv_embed: ConvolutionalPositionalEmbedding {
                        conv: WeightNormConv1d::new(
                            dim,
                            config.encoder_pos_conv_kernel,
                            config.encoder_pos_conv_groups,
                            device,
                        ),
                    },
                    layer_norm: LayerNormConfig::new(dim).init(device),
                    layers,
                    layer_norm_first: config.encoder_layer_norm_first,
                },
            },
        }
    }

    /// Output of every transformer layer, each `[batch, frames, embed_dim]`.
    pub fn extract_features(&self, waveform: Tensor<B, 2>) -> Vec<Tensor<B, 3>> {
        let features = self.feature_extractor.forward(waveform);
        let projected = self.encoder.feature_projection.forward(features);
        self.encoder.transformer.layer_outputs(projected)
    }

    /// Output of the final transformer layer, `[batch, frames, embed_dim]`.
    pub fn forward_last_layer(&self, waveform: Tensor<B, 2>) -> Tensor<B, 3> {
        let features = self.feature_extractor.forward(waveform);
        let mut x = self
            .encoder
            .transformer
            .preprocess(self.encoder.feature_projection.forward(features));
        for layer in &self.encoder.transformer.layers {
            x = layer.forward(x);
        }
        x
    }
}
