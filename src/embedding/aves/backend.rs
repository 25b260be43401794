use std::env;
use std::sync::OnceLock;

use burn::backend::ndarray::{NdArray, NdArrayDevice};
#[cfg(target_os = "macos")]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Metal};
#[cfg(not(target_os = "macos"))]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Vulkan};
#[cfg(feature = "aves-cuda")]
use burn::backend::{Cuda, cuda::CudaDevice};
use tracing::warn;

use crate::embedding::BackendPreference;

/// Environment variable overriding the configured backend.
pub const BACKEND_ENV: &str = "BIRDMAP_BACKEND";

pub(super) type AvesWgpuDevice = WgpuDevice;
pub(super) type AvesCpuDevice = NdArrayDevice;
#[cfg(feature = "aves-cuda")]
pub(super) type AvesCudaDevice = CudaDevice;

pub(super) type AvesWgpuBackend = wgpu::Wgpu;
pub(super) type AvesCpuBackend = NdArray;
#[cfg(feature = "aves-cuda")]
pub(super) type AvesCudaBackend = Cuda;

static WGPU_INIT: OnceLock<()> = OnceLock::new();

/// Apply the env override on top of the configured preference.
pub(super) fn resolve_preference(configured: BackendPreference) -> BackendPreference {
    let requested = env::var(BACKEND_ENV)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());
    match requested.as_deref() {
        None => configured,
        Some("auto") => BackendPreference::Auto,
        Some("cpu") | Some("ndarray") => BackendPreference::Cpu,
        Some("wgpu") | Some("vulkan") | Some("metal") | Some("gpu") => BackendPreference::Wgpu,
        #[cfg(feature = "aves-cuda")]
        Some("cuda") => BackendPreference::Cuda,
        Some(other) => {
            warn!("Unknown encoder backend '{other}' in {BACKEND_ENV}, using {configured:?}.");
            configured
        }
    }
}

pub(super) fn init_wgpu(device: &WgpuDevice) {
    WGPU_INIT.get_or_init(|| {
        #[cfg(target_os = "macos")]
        wgpu::init_setup::<Metal>(device, Default::default());
        #[cfg(not(target_os = "macos"))]
        wgpu::init_setup::<Vulkan>(device, Default::default());
    });
}

pub(super) fn init_cubecl_config() {
    static CUBECL_CONFIG: OnceLock<()> = OnceLock::new();
    CUBECL_CONFIG.get_or_init(|| {
        let mut config = cubecl_runtime::config::GlobalConfig::default();
        config.compilation.cache = Some(cubecl_runtime::config::cache::CacheConfig::Global);
        config.autotune.cache = cubecl_runtime::config::cache::CacheConfig::Global;
        let _ = std::panic::catch_unwind(|| cubecl_runtime::config::GlobalConfig::set(config));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_preference_is_kept_without_override() {
        if env::var(BACKEND_ENV).is_ok() {
            return;
        }
        assert_eq!(
            resolve_preference(BackendPreference::Cpu),
            BackendPreference::Cpu
        );
        assert_eq!(
            resolve_preference(BackendPreference::Auto),
            BackendPreference::Auto
        );
    }
}
