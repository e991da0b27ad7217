//! Queue entry model and its nested source/track records.
//!
//! Field names follow the persisted JSON (camelCase). Unknown fields are rejected so a
//! record from a different schema never loads silently.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

/// Format version written into new queue entries.
pub const DATA_CURRENT_FORMAT_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaStatus {
    Added,
    Downloading,
    Loaded,
    Error,
    Archived,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "Added",
            Self::Downloading => "Downloading",
            Self::Loaded => "Loaded",
            Self::Error => "Error",
            Self::Archived => "Archived",
        }
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extractor-specific extension data tagged by `__type`.
///
/// Anything without a truthy `__type` collapses to `{"__type": "none"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtData(Value);

impl ExtData {
    pub fn none() -> Self {
        Self(json!({ "__type": "none" }))
    }

    /// Wrap a value, normalising untagged data to `none`.
    pub fn new(value: Value) -> Self {
        let tagged = match value.get("__type") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(_) => true,
        };
        if tagged { Self(value) } else { Self::none() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Chapter list carried under `chapters`, skipping malformed entries.
    pub fn chapters(&self) -> Vec<Chapter> {
        self.0
            .get("chapters")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for ExtData {
    fn default() -> Self {
        Self::none()
    }
}

impl Serialize for ExtData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExtData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::new)
    }
}

/// Chapter as reported by the extractor, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
}

/// One downloadable audio or video format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Track {
    pub format_id: String,
    pub format: Option<String>,
    pub ext: String,
    pub vcodec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    pub url: Option<String>,
    pub has_audio: Option<bool>,
    pub has_video: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tbr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vbr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub br: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<f64>,
    #[serde(default)]
    pub e_data: ExtData,
}

/// Media source as resolved by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceFile {
    pub id: String,
    pub title: String,
    pub extractor: String,
    pub webpage_url: String,
    pub tracks: Vec<Track>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub e_data: ExtData,
}

impl SourceFile {
    pub fn chapters(&self) -> Vec<Chapter> {
        self.e_data.chapters()
    }
}

/// A queue entry: the source plus the selected tracks to download and merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MediaFileData {
    pub version: String,
    pub id: String,
    pub status: MediaStatus,
    pub track_ids: Vec<Track>,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    pub source: SourceFile,
}
