//! Library exports for the pipeline binaries, benchmarks and tests.
/// Tracing subscriber setup.
pub mod logging;
/// TOML pipeline configuration.
pub mod config;
pub(crate) mod http_client;
/// CSV metadata tables.
pub mod table;
/// Archive search and audio download.
pub mod acquisition;
/// Metadata to audio file join.
pub mod metadata_join;
/// Audio decoding and resampling.
pub mod audio;
/// Audio encoders.
pub mod embedding;
/// Per-recording embedding extraction.
pub mod extraction;
/// Projections and scatter plots.
pub mod visualization;
