//! Join downloaded metadata to the audio files present on disk.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::table::{MetadataTable, TableError, ensure_parent_dir};

/// Recording id (file stem) to audio path.
pub type PathMap = BTreeMap<String, PathBuf>;

pub const FILEPATH_COLUMN: &str = "filepath";
pub const FILENAME_COLUMN: &str = "filename";
const ID_COLUMN: &str = "id";

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid path map {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Metadata table has no 'id' column")]
    MissingIdColumn,
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Row counts from a join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub total_rows: usize,
    pub matched_rows: usize,
    pub dropped_rows: usize,
}

/// Recursively collect `<stem>.<extension>` files under `root`.
///
/// Paths are stored as walked, so a relative root yields relative paths.
/// Entries are visited in name order; when two files share a stem the one
/// visited last wins and the replacement is logged.
pub fn scan_audio_files(root: &Path, extension: &str) -> Result<PathMap, JoinError> {
    let extension = extension.trim_start_matches('.');
    let mut map = PathMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if dir != root => {
                warn!(
                    dir = %dir.display(),
                    error = %source,
                    "Failed to read directory during scan"
                );
                continue;
            }
            Err(source) => {
                return Err(JoinError::Scan {
                    path: dir.clone(),
                    source,
                });
            }
        };
        let mut entries = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(
                        dir = %dir.display(),
                        error = %err,
                        "Failed to read directory entry during scan"
                    );
                    None
                }
            })
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                warn!(path = %path.display(), "Failed to read file type during scan");
                continue;
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                subdirs.push(path);
                continue;
            }
            if !file_type.is_file() || !has_extension(&path, extension) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Some(previous) = map.insert(stem.to_string(), path.clone()) {
                warn!(
                    "Duplicate recording id {stem}: {} replaces {}",
                    path.display(),
                    previous.display()
                );
            }
        }
        // Reverse so the stack pops subdirectories in name order.
        stack.extend(subdirs.into_iter().rev());
    }
    Ok(map)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Persist the id to path mapping as a JSON object.
pub fn save_path_map(map: &PathMap, path: &Path) -> Result<(), JoinError> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_vec_pretty(map).map_err(|source| JoinError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| JoinError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_path_map(path: &Path) -> Result<PathMap, JoinError> {
    let bytes = fs::read(path).map_err(|source| JoinError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| JoinError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Add `filepath` and `filename` columns and drop rows with no audio file.
pub fn attach_file_paths(
    table: &mut MetadataTable,
    map: &PathMap,
    extension: &str,
) -> Result<JoinReport, JoinError> {
    let extension = extension.trim_start_matches('.');
    let id_index = table
        .column_index(ID_COLUMN)
        .ok_or(JoinError::MissingIdColumn)?;
    let total_rows = table.len();
    let mut filepaths = Vec::with_capacity(total_rows);
    let mut filenames = Vec::with_capacity(total_rows);
    for row in 0..total_rows {
        let id = table.value(row, id_index).trim();
        let filepath = map
            .get(id)
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();
        filepaths.push(filepath);
        filenames.push(format!("{id}.{extension}"));
    }
    table.set_column(FILEPATH_COLUMN, filepaths)?;
    table.set_column(FILENAME_COLUMN, filenames)?;
    let filepath_index = table.require_column(FILEPATH_COLUMN)?;
    table.retain_rows(|row| {
        row.get(filepath_index)
            .is_some_and(|value| !value.is_empty())
    });
    let report = JoinReport {
        total_rows,
        matched_rows: table.len(),
        dropped_rows: total_rows - table.len(),
    };
    if report.dropped_rows > 0 {
        info!(
            "Dropped {} of {} rows without an audio file",
            report.dropped_rows, report.total_rows
        );
    }
    Ok(report)
}

/// Scan (or reuse) the path map, join it into the metadata table and write the result.
pub fn run_join(config: &PipelineConfig, reuse_path_map: bool) -> Result<JoinReport, JoinError> {
    let paths = &config.paths;
    let extension = &config.embedding.audio_extension;
    let map_path = paths.path_map();
    let map = if reuse_path_map && map_path.is_file() {
        info!("Reusing path map {}", map_path.display());
        load_path_map(&map_path)?
    } else {
        info!(
            "Scanning {} for .{extension} files",
            paths.audio_root.display()
        );
        let map = scan_audio_files(&paths.audio_root, extension)?;
        save_path_map(&map, &map_path)?;
        map
    };
    info!("Path map holds {} recordings", map.len());

    let mut table = MetadataTable::read_csv(&paths.metadata_csv)?;
    let report = attach_file_paths(&mut table, &map, extension)?;
    let output = paths.enriched_table();
    table.write_csv(&output)?;
    info!(
        "Wrote {} joined rows to {}",
        report.matched_rows,
        output.display()
    );
    Ok(report)
}
