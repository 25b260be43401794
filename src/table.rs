//! In-memory metadata table backed by CSV files.
//!
//! Cells are kept as strings; an empty cell is the null value. Columns are
//! addressed by header name so stages can carry arbitrary archive fields.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while reading, writing or reshaping a table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Column '{0}' not found")]
    MissingColumn(String),
    #[error("Row has {actual} cells, expected {expected}")]
    RowWidth { expected: usize, actual: usize },
    #[error("Column '{column}' has {actual} values for {expected} rows")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// Header row plus string rows, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MetadataTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Read a comma-delimited file with a header row.
    pub fn read_csv(path: &Path) -> Result<Self, TableError> {
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(csv_err)?;
        let headers = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut table = Self::new(headers);
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            table.rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(table)
    }

    /// Write the table with a header row and no index column, replacing `path`.
    pub fn write_csv(&self, path: &Path) -> Result<(), TableError> {
        ensure_parent_dir(path)?;
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
        writer.write_record(&self.headers).map_err(csv_err)?;
        for row in &self.rows {
            writer.write_record(row).map_err(csv_err)?;
        }
        writer
            .flush()
            .map_err(|source| csv_err(csv::Error::from(source)))?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Cell value, or the empty string when the row is short.
    pub fn value(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// All values of a named column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&str>, TableError> {
        let index = self.require_column(name)?;
        Ok((0..self.rows.len())
            .map(|row| self.value(row, index))
            .collect())
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), TableError> {
        if row.len() != self.headers.len() {
            return Err(TableError::RowWidth {
                expected: self.headers.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Add a column, or overwrite it in place when the header already exists.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<(), TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::ColumnLength {
                column: name.to_string(),
                expected: self.rows.len(),
                actual: values.len(),
            });
        }
        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    if row.len() <= index {
                        row.resize(index + 1, String::new());
                    }
                    row[index] = value;
                }
            }
            None => {
                let width = self.headers.len();
                self.headers.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.resize(width, String::new());
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Keep only rows for which `keep` returns true, preserving order.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[String]) -> bool) {
        self.rows.retain(|row| keep(row));
    }
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), TableError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| TableError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> MetadataTable {
        let mut table = MetadataTable::new(vec!["id".into(), "type".into()]);
        table.push_row(vec!["1".into(), "song".into()]).unwrap();
        table.push_row(vec!["2".into(), "call".into()]).unwrap();
        table
    }

    #[test]
    fn csv_round_trip_keeps_quoted_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/table.csv");
        let mut table = sample();
        table
            .set_column("rmk", vec!["a, b".into(), "say \"hi\"".into()])
            .unwrap();
        table.write_csv(&path).unwrap();
        let loaded = MetadataTable::read_csv(&path).unwrap();
        assert_eq!(loaded, table);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,type,rmk\n"));
    }

    #[test]
    fn set_column_overwrites_existing_header() {
        let mut table = sample();
        table
            .set_column("type", vec!["x".into(), "y".into()])
            .unwrap();
        assert_eq!(table.headers().len(), 2);
        assert_eq!(table.column("type").unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn set_column_rejects_wrong_length() {
        let mut table = sample();
        let err = table.set_column("x", vec!["1".into()]).unwrap_err();
        assert!(matches!(err, TableError::ColumnLength { .. }));
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let table = sample();
        let err = table.column("filepath").unwrap_err();
        assert_eq!(err.to_string(), "Column 'filepath' not found");
    }

    #[test]
    fn retain_rows_preserves_order() {
        let mut table = sample();
        table.push_row(vec!["3".into(), "song".into()]).unwrap();
        table.retain_rows(|row| row[1] == "song");
        assert_eq!(table.column("id").unwrap(), vec!["1", "3"]);
    }
}
