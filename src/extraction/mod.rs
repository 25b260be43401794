//! Embedding extraction over the joined metadata table.
//!
//! Each row's audio is decoded, reduced to the first channel, resampled to the
//! encoder rate and embedded. After every record the features so far are
//! checkpointed; the final table adds the file columns and annotations.

mod checkpoint;
mod matrix;

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

pub use checkpoint::write_checkpoint;
pub use matrix::{EmbeddingMatrix, read_embeddings_csv};

use crate::audio::{AudioError, load_mono};
use crate::config::PipelineConfig;
use crate::embedding::{EmbedError, Embedder, load_embedder};
use crate::metadata_join::{FILENAME_COLUMN, FILEPATH_COLUMN};
use crate::table::{MetadataTable, TableError, ensure_parent_dir};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Metadata table has no '{0}' column")]
    MissingColumn(String),
    #[error("Row {row}: {source}")]
    Audio { row: usize, source: AudioError },
    #[error("Row {row} ({path}): {source}")]
    Embed {
        row: usize,
        path: PathBuf,
        source: EmbedError,
    },
    #[error(transparent)]
    Model(EmbedError),
    #[error("Embedding has {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Expected {expected} annotation values, got {actual}")]
    AnnotationCount { expected: usize, actual: usize },
    #[error("Invalid number '{value}' in {path} row {row}")]
    InvalidNumber {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("Failed to write {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Embed every row of `table`, in order.
///
/// `table` needs the `filepath` and `filename` columns written by the join
/// stage plus every name in `annotations`. The first failing record stops the
/// run; with `checkpoint` set, the features of the records before it are
/// already on disk.
pub fn extract_embeddings<E: Embedder + ?Sized>(
    table: &MetadataTable,
    annotations: &[String],
    embedder: &mut E,
    checkpoint: Option<&Path>,
) -> Result<EmbeddingMatrix, ExtractError> {
    let column = |name: &str| {
        table
            .column_index(name)
            .ok_or_else(|| ExtractError::MissingColumn(name.to_string()))
    };
    let filepath_index = column(FILEPATH_COLUMN)?;
    let filename_index = column(FILENAME_COLUMN)?;
    // The file columns are always written; repeated names collapse.
    let mut carried: Vec<String> = Vec::new();
    for name in annotations {
        if name != FILEPATH_COLUMN && name != FILENAME_COLUMN && !carried.contains(name) {
            carried.push(name.clone());
        }
    }
    let annotation_indices = carried
        .iter()
        .map(|name| column(name.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let sample_rate = embedder.sample_rate();
    let mut matrix = EmbeddingMatrix::new(embedder.embedding_dim(), &carried);
    for row in 0..table.len() {
        let filepath = table.value(row, filepath_index);
        let path = Path::new(filepath);
        let started = Instant::now();
        let samples =
            load_mono(path, sample_rate).map_err(|source| ExtractError::Audio { row, source })?;
        let features = embedder
            .embed(&samples)
            .map_err(|source| ExtractError::Embed {
                row,
                path: path.to_path_buf(),
                source,
            })?;
        matrix.push(
            features,
            filepath.to_string(),
            table.value(row, filename_index).to_string(),
            annotation_indices
                .iter()
                .map(|index| table.value(row, *index).to_string())
                .collect(),
        )?;
        if let Some(checkpoint) = checkpoint {
            write_checkpoint(&matrix, checkpoint)?;
        }
        debug!(
            "Embedded {}/{} {} in {:.2?}",
            row + 1,
            table.len(),
            path.display(),
            started.elapsed()
        );
    }
    Ok(matrix)
}

/// Write the final embedding table.
pub fn write_embeddings(matrix: &EmbeddingMatrix, path: &Path) -> Result<(), ExtractError> {
    ensure_parent_dir(path)?;
    let file = std::fs::File::create(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    matrix
        .write_csv(std::io::BufWriter::new(file))
        .map_err(|source| ExtractError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Load the encoder, embed the joined table and write the checkpoint and final table.
pub fn run_extraction(config: &PipelineConfig) -> Result<EmbeddingMatrix, ExtractError> {
    let paths = &config.paths;
    let table = MetadataTable::read_csv(&paths.enriched_table())?;
    info!(
        "Embedding {} recordings from {}",
        table.len(),
        paths.enriched_table().display()
    );
    let mut embedder = load_embedder(&config.embedding).map_err(ExtractError::Model)?;
    let checkpoint = paths.checkpoint();
    let matrix = extract_embeddings(
        &table,
        &config.embedding.annotation_columns,
        &mut embedder,
        Some(&checkpoint),
    )?;
    let output = paths.embeddings();
    write_embeddings(&matrix, &output)?;
    info!(
        "Wrote {} x {} embeddings to {}",
        matrix.len(),
        matrix.dim(),
        output.display()
    );
    Ok(matrix)
}
