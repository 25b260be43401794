use birdmap::config::PipelineConfig;
use birdmap::extraction::{EmbeddingMatrix, write_embeddings};
use birdmap::metadata_join::FILEPATH_COLUMN;
use birdmap::table::MetadataTable;
use birdmap::visualization::{ProjectionKind, VisualizationError, run_visualization};
use tempfile::tempdir;

const ROWS: usize = 12;

fn seed_outputs(config: &PipelineConfig) {
    let mut matrix = EmbeddingMatrix::new(6, &["id".to_string(), "type".to_string()]);
    let mut table = MetadataTable::new(vec![
        "id".into(),
        "en".into(),
        "rmk".into(),
        "time".into(),
        FILEPATH_COLUMN.into(),
    ]);
    for row in 0..ROWS {
        let group = row % 3;
        let features = (0..6)
            .map(|col| group as f32 * 4.0 + ((row * 7 + col * 3) % 5) as f32 * 0.2)
            .collect();
        let id = (row + 1).to_string();
        let path = format!("/audio/{id}.mp3");
        let label = ["song", "call", "alarm call"][group];
        matrix
            .push(features, path.clone(), format!("{id}.mp3"), vec![id.clone(), label.into()])
            .unwrap();
        table
            .push_row(vec![id, "Great Tit".into(), "".into(), "06:30".into(), path])
            .unwrap();
    }
    write_embeddings(&matrix, &config.paths.embeddings()).unwrap();
    table.write_csv(&config.paths.enriched_table()).unwrap();
}

fn test_config(dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.paths.output_dir = dir.to_path_buf();
    config.plot.figure_inches = 3.0;
    config.plot.dpi = 100;
    config.plot.font_path = None;
    config.plot.export_points = true;
    config
}

#[test]
fn pca_stage_writes_image_and_points() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    seed_outputs(&config);

    let images = run_visualization(&config, &[ProjectionKind::Pca]).unwrap();
    assert_eq!(images, vec![dir.path().join("PCA_3D_plot.jpg")]);
    assert!(images[0].is_file());

    let points: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(config.paths.point_cloud(ProjectionKind::Pca)).unwrap(),
    )
    .unwrap();
    let points = points.as_array().unwrap();
    assert_eq!(points.len(), ROWS);
    assert_eq!(points[0]["path"], "/audio/1.mp3");
    assert_eq!(points[0]["time"], "06:30");
    assert_eq!(points[0]["point"].as_array().unwrap().len(), 3);
}

#[test]
fn unknown_label_column_is_rejected() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.plot.label_column = "landuse".to_string();
    seed_outputs(&config);
    let err = run_visualization(&config, &[ProjectionKind::Pca]).unwrap_err();
    assert!(matches!(err, VisualizationError::MissingLabelColumn(ref name) if name == "landuse"));
}
