//! Metadata and audio download from the xeno-canto archive.
//!
//! A run executes each configured query in order: fetch all result pages,
//! append the summary and per-recording metadata to CSV files, then download
//! the audio with a small worker pool. Nothing is deduplicated across runs;
//! ids that are already present in a metadata file are reported instead.

mod client;
mod query;
mod record;

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

pub use client::{ArchiveClient, ArchiveMetadata, DownloadReport};
pub use query::{BoundingBox, Query};
pub use record::Recording;

use crate::config::{PipelineConfig, QuerySettings};
use crate::table::{MetadataTable, TableError, ensure_parent_dir};

/// Errors raised while querying the archive or persisting its results.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Invalid API URL {url}: {source}")]
    Url {
        url: String,
        source: url::ParseError,
    },
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        source: Box<ureq::Error>,
    },
    #[error("Failed to read response from {url}: {source}")]
    Read {
        url: String,
        source: std::io::Error,
    },
    #[error("Malformed archive response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
    #[error("Recording {0} has no download URL")]
    MissingFileUrl(String),
    #[error("File error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error at {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Outcome of one configured query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRun {
    pub metadata_csv: PathBuf,
    pub summary_csv: PathBuf,
    pub recordings: usize,
    /// Ids that were already present in the metadata CSV before appending.
    pub duplicate_ids: usize,
    pub downloads: DownloadReport,
}

/// Run every configured query in order.
pub fn run_acquisition(config: &PipelineConfig) -> Result<Vec<QueryRun>, AcquisitionError> {
    let settings = &config.acquisition;
    if settings.queries.is_empty() {
        warn!("No acquisition queries configured; nothing to fetch");
        return Ok(Vec::new());
    }
    let client = ArchiveClient::from_settings(settings);
    let mut runs = Vec::with_capacity(settings.queries.len());
    for query_settings in &settings.queries {
        runs.push(run_query(
            &client,
            query_settings,
            settings.attempts,
            settings.parallelism,
        )?);
    }
    Ok(runs)
}

/// Fetch one query, append its CSVs and download its audio.
pub fn run_query(
    client: &ArchiveClient,
    settings: &QuerySettings,
    attempts: usize,
    parallelism: usize,
) -> Result<QueryRun, AcquisitionError> {
    let rendered = settings.query.render()?;
    info!(
        "Running query '{rendered}' into {}",
        settings.recordings_dir.display()
    );
    let metadata = client.fetch_metadata(&settings.query, attempts)?;
    let summary_csv = settings
        .recordings_dir
        .join(format!("metadata_{}", settings.metadata_filename));
    let metadata_csv = settings.recordings_dir.join(&settings.metadata_filename);
    append_summary_csv(&summary_csv, &metadata.summary)?;
    let duplicate_ids = append_recordings_csv(&metadata_csv, &metadata.recordings)?;
    let downloads = client.download_recordings(
        &metadata.recordings,
        &settings.recordings_dir,
        parallelism,
        attempts,
    )?;
    Ok(QueryRun {
        metadata_csv,
        summary_csv,
        recordings: metadata.recordings.len(),
        duplicate_ids,
        downloads,
    })
}

/// Append `field,value` rows for the archive summary fields.
pub fn append_summary_csv(
    path: &Path,
    summary: &[(String, String)],
) -> Result<(), AcquisitionError> {
    let is_new = file_is_empty(path);
    let mut writer = open_append_writer(path)?;
    let csv_err = |source| AcquisitionError::Csv {
        path: path.to_path_buf(),
        source,
    };
    if is_new {
        writer.write_record(["field", "value"]).map_err(csv_err)?;
    }
    for (field, value) in summary {
        writer
            .write_record([field.as_str(), value.as_str()])
            .map_err(csv_err)?;
    }
    writer
        .flush()
        .map_err(|source| csv_err(csv::Error::from(source)))
}

/// Append recordings to the metadata CSV, returning how many ids were already present.
pub fn append_recordings_csv(
    path: &Path,
    recordings: &[Recording],
) -> Result<usize, AcquisitionError> {
    let existing = existing_ids(path)?;
    let duplicates = recordings
        .iter()
        .filter(|recording| existing.contains(&recording.id))
        .count();
    if duplicates > 0 {
        warn!(
            "{duplicates} of {} recordings are already listed in {}; rows are appended as-is",
            recordings.len(),
            path.display()
        );
    }
    let mut writer = open_append_writer(path)?;
    let csv_err = |source| AcquisitionError::Csv {
        path: path.to_path_buf(),
        source,
    };
    // The header goes out with the first serialized record, and only when
    // the file was empty.
    for recording in recordings {
        writer.serialize(recording).map_err(csv_err)?;
    }
    writer
        .flush()
        .map_err(|source| csv_err(csv::Error::from(source)))?;
    Ok(duplicates)
}

fn file_is_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.len() == 0)
        .unwrap_or(true)
}

fn open_append_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, AcquisitionError> {
    ensure_parent_dir(path)?;
    let is_new = file_is_empty(path);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AcquisitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file))
}

fn existing_ids(path: &Path) -> Result<HashSet<String>, AcquisitionError> {
    if file_is_empty(path) {
        return Ok(HashSet::new());
    }
    let table = MetadataTable::read_csv(path)?;
    let Some(index) = table.column_index("id") else {
        return Ok(HashSet::new());
    };
    Ok((0..table.len())
        .map(|row| table.value(row, index).to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn recording(id: &str) -> Recording {
        Recording {
            id: id.to_string(),
            genus: "Parus".to_string(),
            species: "major".to_string(),
            sound_type: "song".to_string(),
            ..Recording::default()
        }
    }

    #[test]
    fn appending_keeps_single_header_and_flags_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recs/euro_cities.csv");
        let first = append_recordings_csv(&path, &[recording("1"), recording("2")]).unwrap();
        assert_eq!(first, 0);
        let second = append_recordings_csv(&path, &[recording("2"), recording("3")]).unwrap();
        assert_eq!(second, 1);

        let table = MetadataTable::read_csv(&path).unwrap();
        assert_eq!(table.column("id").unwrap(), vec!["1", "2", "2", "3"]);
        assert_eq!(table.headers()[1], "gen");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("id,gen,sp").count(), 1);
    }

    #[test]
    fn summary_rows_are_field_value_pairs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata_euro_cities.csv");
        let summary = vec![
            ("numRecordings".to_string(), "2".to_string()),
            ("numPages".to_string(), "1".to_string()),
        ];
        append_summary_csv(&path, &summary).unwrap();
        append_summary_csv(&path, &summary).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "field,value\nnumRecordings,2\nnumPages,1\nnumRecordings,2\nnumPages,1\n"
        );
    }
}
