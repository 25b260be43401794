use std::io::Write;
use std::path::Path;

use ndarray::Array2;

use super::ExtractError;
use crate::metadata_join::{FILENAME_COLUMN, FILEPATH_COLUMN};
use crate::table::MetadataTable;

const FEATURE_PREFIX: &str = "feature_";

/// Embeddings in input order plus the metadata carried alongside each row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dim: usize,
    features: Vec<Vec<f32>>,
    filepaths: Vec<String>,
    filenames: Vec<String>,
    annotations: Vec<(String, Vec<String>)>,
}

impl EmbeddingMatrix {
    pub fn new(dim: usize, annotation_names: &[String]) -> Self {
        Self {
            dim,
            features: Vec::new(),
            filepaths: Vec::new(),
            filenames: Vec::new(),
            annotations: annotation_names
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect(),
        }
    }

    /// Append one row; `annotation_values` follow the order given to [`EmbeddingMatrix::new`].
    pub fn push(
        &mut self,
        features: Vec<f32>,
        filepath: String,
        filename: String,
        annotation_values: Vec<String>,
    ) -> Result<(), ExtractError> {
        if features.len() != self.dim {
            return Err(ExtractError::DimensionMismatch {
                expected: self.dim,
                actual: features.len(),
            });
        }
        if annotation_values.len() != self.annotations.len() {
            return Err(ExtractError::AnnotationCount {
                expected: self.annotations.len(),
                actual: annotation_values.len(),
            });
        }
        self.features.push(features);
        self.filepaths.push(filepath);
        self.filenames.push(filename);
        for ((_, column), value) in self.annotations.iter_mut().zip(annotation_values) {
            column.push(value);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn features(&self) -> &[Vec<f32>] {
        &self.features
    }

    pub fn filepaths(&self) -> &[String] {
        &self.filepaths
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn annotation_names(&self) -> Vec<&str> {
        self.annotations
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn annotation(&self, name: &str) -> Option<&[String]> {
        self.annotations
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Values of a metadata column: `filepath`, `filename` or an annotation.
    pub fn metadata_column(&self, name: &str) -> Option<&[String]> {
        match name {
            FILEPATH_COLUMN => Some(&self.filepaths),
            FILENAME_COLUMN => Some(&self.filenames),
            _ => self.annotation(name),
        }
    }

    /// `rows x dim` matrix of the features.
    pub fn to_array(&self) -> Array2<f32> {
        let flat: Vec<f32> = self.features.iter().flatten().copied().collect();
        Array2::from_shape_vec((self.features.len(), self.dim), flat)
            .unwrap_or_else(|_| Array2::zeros((0, self.dim)))
    }

    /// Features only, header `feature_0..feature_{dim-1}`.
    pub fn write_features_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(feature_headers(self.dim))?;
        for row in &self.features {
            csv.write_record(row.iter().map(|value| value.to_string()))?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Features followed by `filepath`, `filename` and the annotation columns.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        let mut header = feature_headers(self.dim);
        header.push(FILEPATH_COLUMN.to_string());
        header.push(FILENAME_COLUMN.to_string());
        header.extend(self.annotations.iter().map(|(name, _)| name.clone()));
        csv.write_record(&header)?;
        for (row, features) in self.features.iter().enumerate() {
            let mut record: Vec<String> = features.iter().map(|value| value.to_string()).collect();
            record.push(self.filepaths[row].clone());
            record.push(self.filenames[row].clone());
            record.extend(
                self.annotations
                    .iter()
                    .map(|(_, values)| values[row].clone()),
            );
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }
}

fn feature_headers(dim: usize) -> Vec<String> {
    (0..dim).map(|i| format!("{FEATURE_PREFIX}{i}")).collect()
}

/// Read a table written by [`EmbeddingMatrix::write_csv`] (or a features-only checkpoint).
///
/// `feature_*` columns become the features; every other column except
/// `filepath` and `filename` becomes an annotation, in file order.
pub fn read_embeddings_csv(path: &Path) -> Result<EmbeddingMatrix, ExtractError> {
    let table = MetadataTable::read_csv(path)?;
    let mut feature_columns = Vec::new();
    let mut annotation_columns = Vec::new();
    for (index, header) in table.headers().iter().enumerate() {
        if header.starts_with(FEATURE_PREFIX) {
            feature_columns.push(index);
        } else if header != FILEPATH_COLUMN && header != FILENAME_COLUMN {
            annotation_columns.push(index);
        }
    }
    let annotation_names: Vec<String> = annotation_columns
        .iter()
        .map(|index| table.headers()[*index].clone())
        .collect();
    let filepath_index = table.column_index(FILEPATH_COLUMN);
    let filename_index = table.column_index(FILENAME_COLUMN);
    let mut matrix = EmbeddingMatrix::new(feature_columns.len(), &annotation_names);
    for row in 0..table.len() {
        let features = feature_columns
            .iter()
            .map(|column| {
                let raw = table.value(row, *column);
                raw.trim()
                    .parse::<f32>()
                    .map_err(|_| ExtractError::InvalidNumber {
                        path: path.to_path_buf(),
                        row: row + 1,
                        value: raw.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cell = |index: Option<usize>| {
            index
                .map(|index| table.value(row, index).to_string())
                .unwrap_or_default()
        };
        matrix.push(
            features,
            cell(filepath_index),
            cell(filename_index),
            annotation_columns
                .iter()
                .map(|index| table.value(row, *index).to_string())
                .collect(),
        )?;
    }
    Ok(matrix)
}
