//! Reduce embeddings to three dimensions and render them.
//!
//! PCA always runs first on standardized features; t-SNE and UMAP consume
//! the PCA coordinates.

mod export;
mod pca;
mod render;
mod tsne;
mod umap;

use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use export::{PointRecord, export_point_cloud};
pub use pca::{PcaOutput, standardize};
pub use render::render_scatter;

use crate::config::{PipelineConfig, PlotSettings};
use crate::extraction::{ExtractError, read_embeddings_csv};
use crate::table::{MetadataTable, TableError};

/// Output dimensionality of every projection.
pub const COMPONENTS: usize = 3;

#[derive(Debug, Error)]
pub enum VisualizationError {
    #[error("Need at least 2 embeddings to project, got {0}")]
    TooFewRows(usize),
    #[error("Got {labels} labels for {rows} rows")]
    LabelCount { rows: usize, labels: usize },
    #[error("Embedding table has no '{0}' column")]
    MissingLabelColumn(String),
    #[error("Point export needs {expected} metadata rows, table has {actual}")]
    TableRows { expected: usize, actual: usize },
    #[error("PCA failed: {0}")]
    Pca(String),
    #[error("t-SNE failed: {0}")]
    Tsne(String),
    #[error("UMAP failed: {0}")]
    Umap(String),
    #[error("Failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to encode {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Embeddings(#[from] ExtractError),
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionKind {
    Pca,
    Tsne,
    Umap,
}

impl ProjectionKind {
    pub const ALL: [ProjectionKind; 3] = [Self::Pca, Self::Tsne, Self::Umap];

    /// Prefix of the image file name.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Pca => "PCA",
            Self::Tsne => "TSNE",
            Self::Umap => "UMAP",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Pca => "PCA of bird sounds",
            Self::Tsne => "tSNE of bird sounds",
            Self::Umap => "UMAP of bird sounds",
        }
    }

    pub fn axis_labels(self) -> [&'static str; 3] {
        match self {
            Self::Pca => ["PC1", "PC2", "PC3"],
            Self::Tsne => ["tSNE 1", "tSNE 2", "tSNE 3"],
            Self::Umap => ["UMAP 1", "UMAP 2", "UMAP 3"],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pca" => Some(Self::Pca),
            "tsne" | "t-sne" => Some(Self::Tsne),
            "umap" => Some(Self::Umap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UmapMetric {
    #[default]
    Euclidean,
    Cosine,
}

/// Three-dimensional coordinates with one label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub kind: ProjectionKind,
    pub coords: Array2<f32>,
    pub labels: Vec<String>,
}

impl Projection {
    pub fn new(
        kind: ProjectionKind,
        coords: Array2<f32>,
        labels: Vec<String>,
    ) -> Result<Self, VisualizationError> {
        if coords.nrows() != labels.len() {
            return Err(VisualizationError::LabelCount {
                rows: coords.nrows(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            kind,
            coords,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.coords.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.nrows() == 0
    }

    pub fn point(&self, row: usize) -> [f32; 3] {
        let value = |col: usize| {
            if col < self.coords.ncols() {
                self.coords[(row, col)]
            } else {
                0.0
            }
        };
        [value(0), value(1), value(2)]
    }
}

pub(crate) fn validate_input(
    features: &Array2<f32>,
    labels: &[String],
) -> Result<(), VisualizationError> {
    if features.nrows() < 2 {
        return Err(VisualizationError::TooFewRows(features.nrows()));
    }
    if labels.len() != features.nrows() {
        return Err(VisualizationError::LabelCount {
            rows: features.nrows(),
            labels: labels.len(),
        });
    }
    Ok(())
}

/// Standardized PCA to three components.
pub fn project_pca(
    features: &Array2<f32>,
    labels: &[String],
) -> Result<(Projection, PcaOutput), VisualizationError> {
    validate_input(features, labels)?;
    let output = pca::fit_transform(features)?;
    info!(
        "PCA explained variance ratio: {:?}",
        output.explained_variance_ratio
    );
    let projection = Projection::new(ProjectionKind::Pca, output.coords.clone(), labels.to_vec())?;
    Ok((projection, output))
}

/// t-SNE of an existing projection.
pub fn project_tsne(
    input: &Projection,
    settings: &PlotSettings,
) -> Result<Projection, VisualizationError> {
    validate_input(&input.coords, &input.labels)?;
    let coords = tsne::fit_transform(&input.coords, &settings.tsne)?;
    Projection::new(ProjectionKind::Tsne, coords, input.labels.clone())
}

/// UMAP of an existing projection.
pub fn project_umap(
    input: &Projection,
    settings: &PlotSettings,
) -> Result<Projection, VisualizationError> {
    validate_input(&input.coords, &input.labels)?;
    let coords = umap::fit_transform(&input.coords, &settings.umap)?;
    Projection::new(ProjectionKind::Umap, coords, input.labels.clone())
}

/// Project the final embedding table and write one image per requested stage.
///
/// Returns the image paths in stage order.
pub fn run_visualization(
    config: &PipelineConfig,
    stages: &[ProjectionKind],
) -> Result<Vec<PathBuf>, VisualizationError> {
    let paths = &config.paths;
    let settings = &config.plot;
    let matrix = read_embeddings_csv(&paths.embeddings())?;
    let labels = matrix
        .metadata_column(&settings.label_column)
        .ok_or_else(|| VisualizationError::MissingLabelColumn(settings.label_column.clone()))?
        .to_vec();
    let features = matrix.to_array();
    info!(
        "Projecting {} x {} embeddings",
        features.nrows(),
        features.ncols()
    );
    let (pca, _) = project_pca(&features, &labels)?;
    let metadata = if settings.export_points {
        Some(MetadataTable::read_csv(&paths.enriched_table())?)
    } else {
        None
    };

    let mut outputs = Vec::new();
    for kind in ProjectionKind::ALL {
        if !stages.contains(&kind) {
            continue;
        }
        let projection = match kind {
            ProjectionKind::Pca => pca.clone(),
            ProjectionKind::Tsne => project_tsne(&pca, settings)?,
            ProjectionKind::Umap => project_umap(&pca, settings)?,
        };
        let image = paths.plot_image(kind);
        render_scatter(&projection, settings, &image)?;
        info!("Wrote {}", image.display());
        if let Some(table) = &metadata {
            let points = paths.point_cloud(kind);
            export_point_cloud(&projection, table, &points)?;
            info!("Wrote {}", points.display());
        }
        if settings.show
            && let Err(err) = open::that(&image)
        {
            tracing::warn!("Failed to open {}: {err}", image.display());
        }
        outputs.push(image);
    }
    Ok(outputs)
}
