use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::record::flatten_value;
use super::{AcquisitionError, Query, Recording};
use crate::config::AcquisitionSettings;
use crate::http_client::{self, RetryConfig};

const MAX_METADATA_BYTES: usize = 32 * 1024 * 1024;

/// Metadata returned by a query: the recordings plus the archive's summary fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveMetadata {
    pub recordings: Vec<Recording>,
    /// `numRecordings`, `numSpecies`, `page`, `numPages` as reported for page 1.
    pub summary: Vec<(String, String)>,
}

/// Counts from one download run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub bytes: u64,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(rename = "numRecordings", default)]
    num_recordings: Value,
    #[serde(rename = "numSpecies", default)]
    num_species: Value,
    #[serde(default)]
    page: Value,
    #[serde(rename = "numPages", default)]
    num_pages: Value,
    #[serde(default)]
    recordings: Vec<Recording>,
}

impl PageResponse {
    fn page_count(&self) -> u32 {
        match &self.num_pages {
            Value::Number(number) => number.as_u64().map(|n| n as u32).unwrap_or(1),
            Value::String(text) => text.trim().parse().unwrap_or(1),
            _ => 1,
        }
    }

    fn summary(&self) -> Vec<(String, String)> {
        vec![
            ("numRecordings".to_string(), flatten_value(self.num_recordings.clone())),
            ("numSpecies".to_string(), flatten_value(self.num_species.clone())),
            ("page".to_string(), flatten_value(self.page.clone())),
            ("numPages".to_string(), flatten_value(self.num_pages.clone())),
        ]
    }
}

enum DownloadOutcome {
    Downloaded(u64),
    Skipped,
}

/// Client for the archive's recordings endpoint.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    api_url: String,
    api_key: Option<String>,
    max_download_bytes: usize,
}

impl ArchiveClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            max_download_bytes: 256 * 1024 * 1024,
        }
    }

    pub fn from_settings(settings: &AcquisitionSettings) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone().filter(|key| !key.trim().is_empty()),
            max_download_bytes: settings.max_download_bytes.max(1),
        }
    }

    /// Fetch every result page of `query`, retrying each request up to `attempts` times.
    pub fn fetch_metadata(
        &self,
        query: &Query,
        attempts: usize,
    ) -> Result<ArchiveMetadata, AcquisitionError> {
        let first = self.fetch_page(query, 1, attempts)?;
        let pages = first.page_count().max(1);
        let summary = first.summary();
        let mut recordings = first.recordings;
        for page in 2..=pages {
            let next = self.fetch_page(query, page, attempts)?;
            recordings.extend(next.recordings);
        }
        info!(
            "Fetched {} recordings across {} page(s)",
            recordings.len(),
            pages
        );
        Ok(ArchiveMetadata {
            recordings,
            summary,
        })
    }

    /// Fetch the metadata for `query` and download every matching recording.
    pub fn fetch_recordings(
        &self,
        query: &Query,
        output_dir: &Path,
        parallelism: usize,
        attempts: usize,
    ) -> Result<DownloadReport, AcquisitionError> {
        let metadata = self.fetch_metadata(query, attempts)?;
        self.download_recordings(&metadata.recordings, output_dir, parallelism, attempts)
    }

    /// Download recordings with a pool of `parallelism` workers.
    ///
    /// Files already present are skipped. The first failure stops the pool and
    /// is returned; files finished before it stay on disk.
    pub fn download_recordings(
        &self,
        recordings: &[Recording],
        output_dir: &Path,
        parallelism: usize,
        attempts: usize,
    ) -> Result<DownloadReport, AcquisitionError> {
        if recordings.is_empty() {
            return Ok(DownloadReport::default());
        }
        fs::create_dir_all(output_dir).map_err(|source| AcquisitionError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let worker_count = parallelism.clamp(1, recordings.len());
        let queue = Mutex::new(recordings.iter().collect::<VecDeque<_>>());
        let stop = AtomicBool::new(false);
        let downloaded = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let bytes = Mutex::new(0u64);
        let first_error: Mutex<Option<AcquisitionError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| {
                    loop {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        let next = match queue.lock() {
                            Ok(mut guard) => guard.pop_front(),
                            Err(_) => return,
                        };
                        let Some(recording) = next else {
                            break;
                        };
                        match self.download_one(recording, output_dir, attempts) {
                            Ok(DownloadOutcome::Downloaded(size)) => {
                                downloaded.fetch_add(1, Ordering::Relaxed);
                                if let Ok(mut total) = bytes.lock() {
                                    *total += size;
                                }
                            }
                            Ok(DownloadOutcome::Skipped) => {
                                skipped.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                stop.store(true, Ordering::Relaxed);
                                if let Ok(mut slot) = first_error.lock()
                                    && slot.is_none()
                                {
                                    *slot = Some(err);
                                }
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(err) = first_error.into_inner().ok().flatten() {
            return Err(err);
        }
        let report = DownloadReport {
            downloaded: downloaded.into_inner(),
            skipped: skipped.into_inner(),
            bytes: bytes.into_inner().unwrap_or(0),
        };
        info!(
            "Downloaded {} recordings ({} bytes), skipped {} already on disk",
            report.downloaded, report.bytes, report.skipped
        );
        Ok(report)
    }

    fn fetch_page(
        &self,
        query: &Query,
        page: u32,
        attempts: usize,
    ) -> Result<PageResponse, AcquisitionError> {
        let url = query.page_url(&self.api_url, page, self.api_key.as_deref())?;
        debug!("Requesting metadata page {page}: {url}");
        let url_text = url.to_string();
        let retry = RetryConfig::with_attempts(attempts);
        let bytes = http_client::retry_with_backoff(
            retry,
            || {
                let response = http_client::agent()
                    .get(url.as_str())
                    .call()
                    .map_err(|source| AcquisitionError::Request {
                        url: url_text.clone(),
                        source: Box::new(source),
                    })?;
                http_client::read_response_bytes(response, MAX_METADATA_BYTES).map_err(
                    |source| AcquisitionError::Read {
                        url: url_text.clone(),
                        source,
                    },
                )
            },
            should_retry,
        )?;
        serde_json::from_slice(&bytes).map_err(|source| AcquisitionError::Decode {
            url: url_text,
            source,
        })
    }

    fn download_one(
        &self,
        recording: &Recording,
        output_dir: &Path,
        attempts: usize,
    ) -> Result<DownloadOutcome, AcquisitionError> {
        let target = recording.local_path(output_dir);
        if target.is_file() {
            debug!("Skipping {}, already downloaded", target.display());
            return Ok(DownloadOutcome::Skipped);
        }
        let url = recording
            .download_url()
            .ok_or_else(|| AcquisitionError::MissingFileUrl(recording.id.clone()))?;
        let Some(parent) = target.parent() else {
            return Err(AcquisitionError::Io {
                path: target.clone(),
                source: std::io::Error::other("download path has no parent"),
            });
        };
        fs::create_dir_all(parent).map_err(|source| AcquisitionError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let retry = RetryConfig::with_attempts(attempts);
        let size = http_client::retry_with_backoff(
            retry,
            || {
                let response = http_client::agent().get(&url).call().map_err(|source| {
                    AcquisitionError::Request {
                        url: url.clone(),
                        source: Box::new(source),
                    }
                })?;
                let mut temp = tempfile::Builder::new()
                    .prefix(".download")
                    .tempfile_in(parent)
                    .map_err(|source| AcquisitionError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                let size = http_client::copy_response_to_writer(
                    response,
                    temp.as_file_mut(),
                    self.max_download_bytes,
                )
                .map_err(|source| AcquisitionError::Read {
                    url: url.clone(),
                    source,
                })?;
                temp.persist(&target)
                    .map_err(|err| AcquisitionError::Io {
                        path: target.clone(),
                        source: err.error,
                    })?;
                Ok(size)
            },
            should_retry,
        )?;
        debug!("Saved {} ({size} bytes)", target.display());
        if size == 0 {
            warn!("Recording {} downloaded as an empty file", recording.id);
        }
        Ok(DownloadOutcome::Downloaded(size))
    }
}

fn should_retry(error: &AcquisitionError) -> bool {
    match error {
        AcquisitionError::Request { source, .. } => http_client::is_retryable(source),
        AcquisitionError::Read { source, .. } => {
            source.kind() != std::io::ErrorKind::InvalidData
        }
        _ => false,
    }
}
