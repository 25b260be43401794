use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One archive recording as returned by the search API.
///
/// Every field is kept as text so the record can be written straight to CSV.
/// Numbers, nulls and lists coming from the API are flattened to strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Recording {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(rename = "gen", deserialize_with = "lenient_string")]
    pub genus: String,
    #[serde(rename = "sp", deserialize_with = "lenient_string")]
    pub species: String,
    #[serde(rename = "ssp", deserialize_with = "lenient_string")]
    pub subspecies: String,
    #[serde(rename = "en", deserialize_with = "lenient_string")]
    pub english_name: String,
    #[serde(rename = "rec", deserialize_with = "lenient_string")]
    pub recordist: String,
    #[serde(rename = "cnt", deserialize_with = "lenient_string")]
    pub country: String,
    #[serde(rename = "loc", deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(deserialize_with = "lenient_string")]
    pub lat: String,
    #[serde(deserialize_with = "lenient_string")]
    pub lng: String,
    #[serde(deserialize_with = "lenient_string")]
    pub alt: String,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub sound_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub sex: String,
    #[serde(deserialize_with = "lenient_string")]
    pub stage: String,
    #[serde(deserialize_with = "lenient_string")]
    pub method: String,
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
    /// Download URL of the audio payload.
    #[serde(deserialize_with = "lenient_string")]
    pub file: String,
    #[serde(rename = "file-name", deserialize_with = "lenient_string")]
    pub file_name: String,
    #[serde(rename = "lic", deserialize_with = "lenient_string")]
    pub license: String,
    #[serde(rename = "q", deserialize_with = "lenient_string")]
    pub quality: String,
    #[serde(deserialize_with = "lenient_string")]
    pub length: String,
    #[serde(deserialize_with = "lenient_string")]
    pub time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub uploaded: String,
    /// Background species, comma separated.
    #[serde(deserialize_with = "lenient_string")]
    pub also: String,
    #[serde(rename = "rmk", deserialize_with = "lenient_string")]
    pub remarks: String,
    #[serde(rename = "bird-seen", deserialize_with = "lenient_string")]
    pub bird_seen: String,
    #[serde(rename = "animal-seen", deserialize_with = "lenient_string")]
    pub animal_seen: String,
    #[serde(rename = "playback-used", deserialize_with = "lenient_string")]
    pub playback_used: String,
    #[serde(rename = "temp", deserialize_with = "lenient_string")]
    pub temperature: String,
    #[serde(deserialize_with = "lenient_string")]
    pub regnr: String,
    #[serde(deserialize_with = "lenient_string")]
    pub auto: String,
    #[serde(rename = "dvc", deserialize_with = "lenient_string")]
    pub device: String,
    #[serde(rename = "mic", deserialize_with = "lenient_string")]
    pub microphone: String,
    #[serde(rename = "smp", deserialize_with = "lenient_string")]
    pub sample_rate: String,
}

impl Recording {
    /// Absolute download URL, adding a scheme to protocol-relative links.
    pub fn download_url(&self) -> Option<String> {
        let file = self.file.trim();
        if file.is_empty() {
            return None;
        }
        if let Some(rest) = file.strip_prefix("//") {
            return Some(format!("https://{rest}"));
        }
        Some(file.to_string())
    }

    /// Lowercase extension of the archive filename, `mp3` when absent.
    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "mp3".to_string())
    }

    /// Local destination: `<output_dir>/<gen>_<sp>/<id>.<ext>`.
    pub fn local_path(&self, output_dir: &Path) -> PathBuf {
        let folder = format!(
            "{}_{}",
            sanitize_component(&self.genus),
            sanitize_component(&self.species)
        );
        output_dir
            .join(folder)
            .join(format!("{}.{}", sanitize_component(&self.id), self.extension()))
    }
}

fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(flatten_value).unwrap_or_default())
}

pub(crate) fn flatten_value(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Array(items) => items
            .into_iter()
            .map(flatten_value)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
