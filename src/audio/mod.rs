//! Audio loading for embedding extraction: decode, keep the first channel,
//! resample to the encoder rate.

mod decode;
mod resample;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use decode::{DecodedAudio, decode_audio};
pub use resample::resample;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Audio decode failed for {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Decoded 0 samples from {0}")]
    Empty(PathBuf),
    #[error("Resampling {from} Hz to {to} Hz failed: {message}")]
    Resample { from: u32, to: u32, message: String },
}

/// Take channel 0 from interleaved samples.
pub fn first_channel(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(channels).copied().collect()
}

/// Decode `path`, keep the first channel and resample to `target_rate`.
pub fn load_mono(path: &Path, target_rate: u32) -> Result<Vec<f32>, AudioError> {
    let decoded = decode_audio(path)?;
    let mono = first_channel(&decoded.samples, decoded.channels);
    if decoded.sample_rate == target_rate {
        return Ok(mono);
    }
    resample(&mono, decoded.sample_rate, target_rate)
}
