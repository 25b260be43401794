//! Fixed-length audio embeddings.
//!
//! Extraction talks to the encoder through [`Embedder`]; the AVES model is the
//! production implementation and tests plug in stubs.

pub mod aves;

use std::path::PathBuf;

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aves::{AvesConfig, AvesEncoder, AvesModel};

use crate::config::EmbeddingSettings;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid encoder config {path}: {source}")]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid encoder config: {0}")]
    InvalidConfig(String),
    #[error("Failed to load encoder weights from {path}: {message}")]
    Weights { path: PathBuf, message: String },
    #[error("Compute backend unavailable: {0}")]
    Backend(String),
    #[error("Audio too short for the encoder: {samples} samples, need at least {min_samples}")]
    TooShort { samples: usize, min_samples: usize },
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Compute backend used for encoder inference.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Try WGPU, fall back to the CPU backend.
    #[default]
    Auto,
    Cpu,
    Wgpu,
    #[cfg(feature = "aves-cuda")]
    Cuda,
}

/// Turns a mono waveform at [`Embedder::sample_rate`] into one vector.
pub trait Embedder {
    fn sample_rate(&self) -> u32;
    fn embedding_dim(&self) -> usize;
    fn embed(&mut self, samples: &[f32]) -> Result<Vec<f32>, EmbedError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn embedding_dim(&self) -> usize {
        (**self).embedding_dim()
    }

    fn embed(&mut self, samples: &[f32]) -> Result<Vec<f32>, EmbedError> {
        (**self).embed(samples)
    }
}

/// Average `[batch, frames, dim]` over frames into `[batch, dim]`.
pub fn mean_pool<B: Backend>(sequence: Tensor<B, 3>) -> Tensor<B, 2> {
    let [batch, _, dim] = sequence.dims();
    sequence.mean_dim(1).reshape([batch, dim])
}

/// Load the AVES encoder described by the embedding settings.
pub fn load_embedder(settings: &EmbeddingSettings) -> Result<AvesModel, EmbedError> {
    AvesModel::load(
        &settings.model_config,
        &settings.model_weights,
        settings.sample_rate,
        settings.backend,
    )
}
