use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use super::{Projection, VisualizationError};
use crate::metadata_join::FILEPATH_COLUMN;
use crate::table::{MetadataTable, ensure_parent_dir};

/// Species columns tried in order: English name, then epithet.
const SPECIES_COLUMNS: [&str; 2] = ["en", "sp"];
const REMARK_COLUMN: &str = "rmk";
const TIME_COLUMN: &str = "time";
const LANDUSE_COLUMN: &str = "landuse";

/// One point of the exported cloud.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRecord {
    pub point: [f32; 3],
    pub path: String,
    pub sp: String,
    pub remark: String,
    pub time: String,
    pub landuse: String,
}

/// Write `projection` as a JSON array of points joined row by row with `table`.
///
/// `table` is the joined metadata the embeddings were extracted from, so its
/// rows line up with the projection. Missing columns export as empty strings.
pub fn export_point_cloud(
    projection: &Projection,
    table: &MetadataTable,
    path: &Path,
) -> Result<Vec<PointRecord>, VisualizationError> {
    if table.len() != projection.len() {
        return Err(VisualizationError::TableRows {
            expected: projection.len(),
            actual: table.len(),
        });
    }
    let filepath = table.column_index(FILEPATH_COLUMN);
    let species: Vec<usize> = SPECIES_COLUMNS
        .iter()
        .filter_map(|name| table.column_index(name))
        .collect();
    let remark = table.column_index(REMARK_COLUMN);
    let time = table.column_index(TIME_COLUMN);
    let landuse = table.column_index(LANDUSE_COLUMN);
    let cell = |row: usize, column: Option<usize>| {
        column
            .map(|column| table.value(row, column).to_string())
            .unwrap_or_default()
    };

    let records: Vec<PointRecord> = (0..projection.len())
        .map(|row| PointRecord {
            point: projection.point(row),
            path: cell(row, filepath),
            sp: species
                .iter()
                .map(|column| table.value(row, *column))
                .find(|value| !value.is_empty())
                .unwrap_or_default()
                .to_string(),
            remark: cell(row, remark),
            time: cell(row, time),
            landuse: cell(row, landuse),
        })
        .collect();

    ensure_parent_dir(path)?;
    let io_err = |source: std::io::Error| VisualizationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer_pretty(&mut writer, &records).map_err(|source| {
        VisualizationError::Json {
            path: path.to_path_buf(),
            source,
        }
    })?;
    writer.flush().map_err(io_err)?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualization::ProjectionKind;
    use ndarray::array;

    #[test]
    fn points_carry_metadata() {
        let mut table = MetadataTable::new(vec![
            "id".into(),
            "sp".into(),
            "en".into(),
            "rmk".into(),
            "filepath".into(),
        ]);
        table
            .push_row(vec![
                "1".into(),
                "major".into(),
                "Great Tit".into(),
                "dawn".into(),
                "/a/1.mp3".into(),
            ])
            .unwrap();
        table
            .push_row(vec![
                "2".into(),
                "caeruleus".into(),
                "".into(),
                "".into(),
                "/a/2.mp3".into(),
            ])
            .unwrap();
        let projection = Projection::new(
            ProjectionKind::Umap,
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            vec!["song".into(), "call".into()],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("umap_points.json");
        let records = export_point_cloud(&projection, &table, &path).unwrap();
        assert_eq!(records[0].sp, "Great Tit");
        assert_eq!(records[1].sp, "caeruleus");
        assert_eq!(records[1].time, "");
        assert_eq!(records[0].landuse, "");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["point"], serde_json::json!([1.0, 2.0, 3.0]));
        assert_eq!(value[0]["path"], "/a/1.mp3");
        assert_eq!(value[0]["remark"], "dawn");
        assert_eq!(value[0]["landuse"], "");
    }

    #[test]
    fn landuse_column_is_exported() {
        let mut table = MetadataTable::new(vec!["id".into(), "landuse".into()]);
        table.push_row(vec!["1".into(), "urban park".into()]).unwrap();
        table.push_row(vec!["2".into(), "forest".into()]).unwrap();
        let projection = Projection::new(
            ProjectionKind::Tsne,
            array![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]],
            vec!["song".into(), "song".into()],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsne_points.json");
        let records = export_point_cloud(&projection, &table, &path).unwrap();
        assert_eq!(records[0].landuse, "urban park");
        assert_eq!(records[1].landuse, "forest");
        assert_eq!(records[1].path, "");
    }

    #[test]
    fn row_mismatch_is_rejected() {
        let table = MetadataTable::new(vec!["id".into()]);
        let projection = Projection::new(
            ProjectionKind::Pca,
            array![[0.0, 0.0, 0.0]],
            vec!["x".into()],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = export_point_cloud(&projection, &table, &dir.path().join("p.json")).unwrap_err();
        assert!(matches!(
            err,
            VisualizationError::TableRows {
                expected: 1,
                actual: 0
            }
        ));
    }
}
