//! Pipeline configuration loaded from a single TOML document.
//!
//! Config keys (TOML): `[paths]`, `[acquisition]` with `[[acquisition.queries]]`,
//! `[embedding]`, `[plot]` with `[plot.tsne]` and `[plot.umap]`. Every key is
//! optional; missing keys fall back to the defaults below.

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acquisition::Query;
use crate::embedding::BackendPreference;
use crate::visualization::{ProjectionKind, UmapMetric};

/// Default filename of the pipeline config inside the app directory.
pub const CONFIG_FILE_NAME: &str = "birdmap.toml";
/// Name of the app directory under the OS config root.
pub const APP_DIR_NAME: &str = ".birdmap";
/// Environment variable replacing the OS config root.
pub const CONFIG_HOME_ENV: &str = "BIRDMAP_CONFIG_HOME";
const LOGS_DIR_NAME: &str = "logs";

const PATH_MAP_FILE_NAME: &str = "mp3dict.json";
const ENRICHED_TABLE_FILE_NAME: &str = "final_data.csv";
const CHECKPOINT_FILE_NAME: &str = "tmp_embeddings.csv";
const EMBEDDINGS_FILE_NAME: &str = "LS_embeddings.csv";

/// Errors raised while loading the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// An explicitly requested config file does not exist.
    #[error("Config file not found at {0}")]
    Missing(PathBuf),
    /// Neither `BIRDMAP_CONFIG_HOME` nor an OS config directory is available.
    #[error("No config directory available; set {CONFIG_HOME_ENV}")]
    NoAppDir,
}

/// Full configuration shared by every pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathSettings,
    pub acquisition: AcquisitionSettings,
    pub embedding: EmbeddingSettings,
    pub plot: PlotSettings,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    /// Downloaded metadata table (CSV with an `id` column).
    pub metadata_csv: PathBuf,
    /// Directory tree scanned for `<id>.<ext>` audio files.
    pub audio_root: PathBuf,
    /// Directory receiving the join, embedding and plot outputs.
    pub output_dir: PathBuf,
    /// Optional log directory; defaults to the app `logs` folder.
    pub log_dir: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            metadata_csv: PathBuf::from("data/euro_cities_recordings/euro_cities.csv"),
            audio_root: PathBuf::from("data/euro_cities_recordings"),
            output_dir: PathBuf::from("data/euro_cities_recordings"),
            log_dir: None,
        }
    }
}

impl PathSettings {
    /// JSON sidecar holding the identifier to path mapping.
    pub fn path_map(&self) -> PathBuf {
        self.output_dir.join(PATH_MAP_FILE_NAME)
    }

    /// Enriched metadata table written by the join stage.
    pub fn enriched_table(&self) -> PathBuf {
        self.output_dir.join(ENRICHED_TABLE_FILE_NAME)
    }

    /// Per-record checkpoint written during extraction.
    pub fn checkpoint(&self) -> PathBuf {
        self.output_dir.join(CHECKPOINT_FILE_NAME)
    }

    /// Final embedding table.
    pub fn embeddings(&self) -> PathBuf {
        self.output_dir.join(EMBEDDINGS_FILE_NAME)
    }

    /// Image written for one projection kind.
    pub fn plot_image(&self, kind: ProjectionKind) -> PathBuf {
        self.output_dir.join(format!("{}_3D_plot.jpg", kind.file_stem()))
    }

    /// Point-cloud export for one projection kind.
    pub fn point_cloud(&self, kind: ProjectionKind) -> PathBuf {
        self.output_dir
            .join(format!("{}_points.json", kind.file_stem().to_ascii_lowercase()))
    }
}

/// Archive download settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Recordings endpoint of the archive API.
    pub api_url: String,
    /// API key sent as the `key` parameter when set.
    pub api_key: Option<String>,
    /// Attempts per HTTP request, including the first try.
    pub attempts: usize,
    /// Number of concurrent audio downloads.
    pub parallelism: usize,
    /// Upper bound for a single audio payload.
    pub max_download_bytes: usize,
    /// Queries run in order by `birdmap-fetch`.
    pub queries: Vec<QuerySettings>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            api_url: "https://xeno-canto.org/api/2/recordings".to_string(),
            api_key: None,
            attempts: 10,
            parallelism: 12,
            max_download_bytes: 256 * 1024 * 1024,
            queries: Vec::new(),
        }
    }
}

/// One archive query and where its results land.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuerySettings {
    /// Name of the per-recording metadata CSV (also used for `metadata_<name>`).
    pub metadata_filename: String,
    /// Directory receiving audio files and the per-recording CSV.
    pub recordings_dir: PathBuf,
    /// Search filters.
    #[serde(flatten)]
    pub query: Query,
}

/// Encoder and extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// torchaudio-style JSON with the encoder hyperparameters.
    pub model_config: PathBuf,
    /// Encoder weights (`.pt`/`.pth` state dict or burnpack).
    pub model_weights: PathBuf,
    /// Sample rate expected by the encoder.
    pub sample_rate: u32,
    /// Audio file extension scanned by the join stage.
    pub audio_extension: String,
    /// Metadata columns carried into the embedding table.
    pub annotation_columns: Vec<String>,
    /// Compute backend preference.
    pub backend: BackendPreference,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_config: PathBuf::from(
                "AVES_finetuning/aves_base_bio_files/aves-base-bio.torchaudio.model_config.json",
            ),
            model_weights: PathBuf::from(
                "AVES_finetuning/aves_base_bio_files/aves-base-bio.torchaudio.pt",
            ),
            sample_rate: 16_000,
            audio_extension: "mp3".to_string(),
            annotation_columns: vec!["id".to_string(), "type".to_string()],
            backend: BackendPreference::Auto,
        }
    }
}

/// Projection and rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlotSettings {
    /// Metadata column used to color points.
    pub label_column: String,
    /// Projections rendered by `birdmap-plot` and `birdmap`.
    pub stages: Vec<ProjectionKind>,
    /// Figure edge length in inches.
    pub figure_inches: f32,
    /// Raster resolution.
    pub dpi: u32,
    /// TTF font used for titles, axes and the legend.
    pub font_path: Option<PathBuf>,
    /// Open each rendered image in the system viewer.
    pub show: bool,
    /// Also write a JSON point cloud per projection.
    pub export_points: bool,
    pub tsne: TsneSettings,
    pub umap: UmapSettings,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            label_column: "type".to_string(),
            stages: vec![ProjectionKind::Pca, ProjectionKind::Tsne, ProjectionKind::Umap],
            figure_inches: 10.0,
            dpi: 300,
            font_path: Some(PathBuf::from(
                "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            )),
            show: false,
            export_points: false,
            tsne: TsneSettings::default(),
            umap: UmapSettings::default(),
        }
    }
}

impl PlotSettings {
    /// Square image edge in pixels.
    pub fn image_size(&self) -> u32 {
        (self.figure_inches.max(1.0) * self.dpi.max(1) as f32).round() as u32
    }
}

/// t-SNE parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TsneSettings {
    pub perplexity: f64,
    pub approx_threshold: f64,
    pub max_iter: usize,
    /// Fixed seed; unseeded runs differ between invocations.
    pub seed: Option<u64>,
}

impl Default for TsneSettings {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            approx_threshold: 0.5,
            max_iter: 1000,
            seed: None,
        }
    }
}

/// UMAP parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UmapSettings {
    pub n_neighbors: usize,
    pub min_dist: f32,
    pub metric: UmapMetric,
    /// Fixed seed; unseeded runs differ between invocations.
    pub seed: Option<u64>,
}

impl Default for UmapSettings {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            min_dist: 0.1,
            metric: UmapMetric::Euclidean,
            seed: None,
        }
    }
}

impl PipelineConfig {
    fn normalized(mut self) -> Self {
        self.acquisition.attempts = self.acquisition.attempts.max(1);
        self.acquisition.parallelism = self.acquisition.parallelism.clamp(1, 64);
        self.embedding.sample_rate = self.embedding.sample_rate.max(1);
        self.embedding.audio_extension = self
            .embedding
            .audio_extension
            .trim_start_matches('.')
            .to_ascii_lowercase();
        self.plot.umap.n_neighbors = self.plot.umap.n_neighbors.max(1);
        self
    }
}

/// The `.birdmap` directory holding `birdmap.toml` and the default `logs` folder.
///
/// `BIRDMAP_CONFIG_HOME` replaces the OS config root when set. Nothing is
/// created here.
pub fn app_dir() -> Result<PathBuf, ConfigError> {
    let base = match std::env::var_os(CONFIG_HOME_ENV) {
        Some(base) if !base.is_empty() => PathBuf::from(base),
        _ => BaseDirs::new()
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoAppDir)?,
    };
    Ok(base.join(APP_DIR_NAME))
}

/// Log directory used when `paths.log_dir` is unset.
pub fn default_log_dir() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.join(LOGS_DIR_NAME))
}

/// Resolve the config: explicit path, then `birdmap.toml` in [`app_dir`], then defaults.
pub fn load(explicit: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        return load_from(path);
    }
    load_or_default(&app_dir()?.join(CONFIG_FILE_NAME))
}

fn load_or_default(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if path.exists() {
        return load_from(path);
    }
    Ok(PipelineConfig::default())
}

/// Parse a config file from disk.
pub fn load_from(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

fn parse(text: &str) -> Result<PipelineConfig, toml::de::Error> {
    toml::from_str::<PipelineConfig>(text).map(PipelineConfig::normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::BoundingBox;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, PipelineConfig::default().normalized());
        assert_eq!(config.embedding.sample_rate, 16_000);
        assert_eq!(config.acquisition.parallelism, 12);
        assert_eq!(config.plot.image_size(), 3000);
    }

    #[test]
    fn output_files_live_in_output_dir() {
        let paths = PathSettings {
            output_dir: PathBuf::from("out"),
            ..PathSettings::default()
        };
        assert_eq!(paths.path_map(), PathBuf::from("out/mp3dict.json"));
        assert_eq!(paths.enriched_table(), PathBuf::from("out/final_data.csv"));
        assert_eq!(paths.checkpoint(), PathBuf::from("out/tmp_embeddings.csv"));
        assert_eq!(paths.embeddings(), PathBuf::from("out/LS_embeddings.csv"));
        assert_eq!(
            paths.plot_image(ProjectionKind::Tsne),
            PathBuf::from("out/TSNE_3D_plot.jpg")
        );
        assert_eq!(
            paths.point_cloud(ProjectionKind::Umap),
            PathBuf::from("out/umap_points.json")
        );
    }

    #[test]
    fn parses_queries_and_overrides() {
        let text = r#"
            [paths]
            output_dir = "runs/bcn"

            [acquisition]
            attempts = 0
            parallelism = 4

            [[acquisition.queries]]
            metadata_filename = "barcelona_metadata.csv"
            recordings_dir = "dataset_barcelona"
            box = { lat_min = 41.208, lon_min = 1.836, lat_max = 41.566, lon_max = 2.508 }
            q_gt = "C"

            [embedding]
            audio_extension = ".MP3"
            annotation_columns = ["en", "type"]
            backend = "cpu"

            [plot]
            stages = ["pca", "umap"]

            [plot.umap]
            metric = "cosine"
            seed = 7
        "#;
        let config = parse(text).unwrap();
        assert_eq!(config.paths.output_dir, PathBuf::from("runs/bcn"));
        assert_eq!(config.acquisition.attempts, 1);
        assert_eq!(config.acquisition.parallelism, 4);
        let query = &config.acquisition.queries[0];
        assert_eq!(query.metadata_filename, "barcelona_metadata.csv");
        assert_eq!(
            query.query.bounding_box,
            Some(BoundingBox {
                lat_min: 41.208,
                lon_min: 1.836,
                lat_max: 41.566,
                lon_max: 2.508,
            })
        );
        assert_eq!(query.query.quality_above.as_deref(), Some("C"));
        assert_eq!(config.embedding.audio_extension, "mp3");
        assert_eq!(config.embedding.backend, BackendPreference::Cpu);
        assert_eq!(
            config.plot.stages,
            vec![ProjectionKind::Pca, ProjectionKind::Umap]
        );
        assert_eq!(config.plot.umap.metric, UmapMetric::Cosine);
        assert_eq!(config.plot.umap.seed, Some(7));
        assert_eq!(config.plot.umap.n_neighbors, 15);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn app_dir_file_is_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
        assert_eq!(load_or_default(&path).unwrap(), PipelineConfig::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[plot]\ndpi = 72\n").unwrap();
        assert_eq!(load_or_default(&path).unwrap().plot.dpi, 72);
    }

    #[test]
    fn logs_live_inside_app_dir() {
        if let (Ok(app), Ok(logs)) = (app_dir(), default_log_dir()) {
            assert!(app.ends_with(APP_DIR_NAME));
            assert_eq!(logs, app.join("logs"));
        }
    }

    #[test]
    fn invalid_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "paths = 3").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
