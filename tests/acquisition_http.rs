mod support;

use std::collections::HashMap;

use birdmap::acquisition::{self, AcquisitionError, ArchiveClient, Query};
use birdmap::config::{PipelineConfig, QuerySettings};
use birdmap::table::MetadataTable;
use serde_json::json;
use tempfile::tempdir;

fn page(base: &str, page: u32, ids: &[&str]) -> Vec<u8> {
    let recordings: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "gen": "Parus",
                "sp": "major",
                "en": "Great Tit",
                "type": "song",
                "file": format!("{base}/audio/{id}"),
                "file-name": format!("XC{id}-great-tit.mp3"),
                "also": ["Cyanistes caeruleus", "Sitta europaea"],
                "lat": 52.1,
            })
        })
        .collect();
    serde_json::to_vec(&json!({
        "numRecordings": "3",
        "numSpecies": "1",
        "page": page,
        "numPages": 2,
        "recordings": recordings,
    }))
    .unwrap()
}

fn archive_routes(base: &str) -> HashMap<String, Vec<u8>> {
    let mut routes = HashMap::new();
    routes.insert(
        "/api/2/recordings?page=1".to_string(),
        page(base, 1, &["101", "102"]),
    );
    routes.insert(
        "/api/2/recordings?page=2".to_string(),
        page(base, 2, &["103"]),
    );
    for id in ["101", "102", "103"] {
        routes.insert(format!("/audio/{id}"), format!("ID3 audio {id}").into_bytes());
    }
    routes
}

fn config_for(base_url: &str, recordings_dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.acquisition.api_url = format!("{base_url}/api/2/recordings");
    config.acquisition.attempts = 1;
    config.acquisition.parallelism = 2;
    config.acquisition.queries = vec![QuerySettings {
        metadata_filename: "great_tit.csv".to_string(),
        recordings_dir: recordings_dir.to_path_buf(),
        query: Query::default().with_genus("Parus").with_country("Netherlands"),
    }];
    config
}

#[test]
fn pages_are_merged_in_order() {
    let server = support::http::spawn(archive_routes);
    let client = ArchiveClient::new(format!("{}/api/2/recordings", server.base_url));
    let metadata = client
        .fetch_metadata(&Query::default().with_genus("Parus"), 1)
        .unwrap();
    let ids: Vec<_> = metadata.recordings.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["101", "102", "103"]);
    assert_eq!(metadata.recordings[0].also, "Cyanistes caeruleus, Sitta europaea");
    assert!(
        metadata
            .summary
            .contains(&("numRecordings".to_string(), "3".to_string()))
    );
    let requests = server.requests.lock().unwrap();
    assert!(requests.iter().any(|r| r.contains("page=2")));
    assert!(requests.iter().all(|r| r.contains("query=gen%3AParus")));
}

#[test]
fn acquisition_writes_csvs_and_downloads_audio() {
    let server = support::http::spawn(archive_routes);
    let dir = tempdir().unwrap();
    let recordings_dir = dir.path().join("recordings");
    let config = config_for(&server.base_url, &recordings_dir);

    let runs = acquisition::run_acquisition(&config).unwrap();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.recordings, 3);
    assert_eq!(run.duplicate_ids, 0);
    assert_eq!(run.downloads.downloaded, 3);
    let audio = std::fs::read(recordings_dir.join("Parus_major/102.mp3")).unwrap();
    assert_eq!(audio, b"ID3 audio 102");

    let table = MetadataTable::read_csv(&run.metadata_csv).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.column("id").unwrap(), vec!["101", "102", "103"]);
    let summary = std::fs::read_to_string(&run.summary_csv).unwrap();
    assert!(summary.starts_with("field,value\n"));

    // A second run appends the same ids and skips the files on disk.
    let again = acquisition::run_acquisition(&config).unwrap();
    assert_eq!(again[0].duplicate_ids, 3);
    assert_eq!(again[0].downloads.skipped, 3);
    assert_eq!(again[0].downloads.downloaded, 0);
    let table = MetadataTable::read_csv(&run.metadata_csv).unwrap();
    assert_eq!(table.len(), 6);
    let leftovers = std::fs::read_dir(recordings_dir.join("Parus_major"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".download"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn missing_endpoint_is_reported() {
    let server = support::http::spawn(|_| HashMap::new());
    let client = ArchiveClient::new(format!("{}/nowhere", server.base_url));
    let err = client
        .fetch_metadata(&Query::default().with_genus("Parus"), 3)
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Request { .. }));
    // 404 is not retried.
    assert_eq!(server.requests.lock().unwrap().len(), 1);
}
