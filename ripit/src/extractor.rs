//! Extractor front end: URL detection and metadata mapping from `--dump-single-json` output.

use std::path::{Path, PathBuf};

use process_utils::{ProcessRunner, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{ExtData, SourceFile, Track};
use crate::{Error, Result};

/// Source-level extension keys carried in `eData`.
const SOURCE_EXT_KEYS: &[&str] = &[
    "_type",
    "channel_url",
    "view_count",
    "average_rating",
    "age_limit",
    "categories",
    "playable_in_embed",
    "live_status",
    "media_type",
    "release_timestamp",
    "subtitles",
    "comment_count",
    "location",
    "like_count",
    "channel",
    "channel_follower_count",
    "uploader_id",
    "uploader_url",
    "timestamp",
    "availability",
    "original_url",
    "webpage_url_basename",
    "webpage_url_domain",
    "extractor_key",
    "playlist",
    "playlist_index",
    "display_id",
    "fulltitle",
    "duration_string",
    "release_year",
    "is_live",
    "was_live",
    "requested_subtitles",
    "epoch",
    "format_id",
    "format_note",
    "resolution",
    "dynamic_range",
    "protocol",
    "format",
];

/// Track-level extension keys carried in `eData`.
const TRACK_EXT_KEYS: &[&str] = &[
    "format_note",
    "format_index",
    "manifest_url",
    "language",
    "protocol",
    "preference",
    "quality",
    "has_drm",
    "source_preference",
    "audio_ext",
    "video_ext",
    "resolution",
    "aspect_ratio",
    "rows",
    "columns",
    "filesize_approx",
    "dynamic_range",
    "audio_channels",
    "language_preference",
];

/// Lightweight description of what a URL points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl UrlInfo {
    pub fn is_video(&self) -> bool {
        self.kind == "video"
    }
}

pub fn map_to_url_info(json: &Value) -> UrlInfo {
    UrlInfo {
        kind: str_field(json, "_type").unwrap_or_else(|| "video".to_string()),
        count: json
            .get("entries")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        title: str_field(json, "title"),
        uploader: str_field(json, "uploader"),
        channel_id: str_field(json, "channel_id").or_else(|| str_field(json, "channelId")),
    }
}

/// Map a full single-video dump to a [`SourceFile`].
///
/// Fails with a validation error when a required field is missing.
pub fn map_to_source_file(json: &Value) -> Result<SourceFile> {
    let extractor = str_field(json, "extractor")
        .or_else(|| str_field(json, "extractor_key"))
        .unwrap_or_else(|| "unknown".to_string());

    let tracks = json
        .get("formats")
        .and_then(Value::as_array)
        .map(|formats| {
            formats
                .iter()
                .enumerate()
                .map(|(index, format)| map_track(index, format, &extractor))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let mut e_data = pick(json, SOURCE_EXT_KEYS, &extractor);
    let chapters = chapters(json);
    if !chapters.is_empty() {
        e_data.insert("chapters".to_string(), Value::Array(chapters));
    }

    Ok(SourceFile {
        id: required_str(json, "id")?,
        title: required_str(json, "title")?,
        extractor,
        webpage_url: required_str(json, "webpage_url")?,
        tracks,
        playlist_id: str_field(json, "playlist_id"),
        uploader: str_field(json, "uploader"),
        upload_date: str_field(json, "upload_date"),
        duration: json.get("duration").and_then(Value::as_f64),
        description: str_field(json, "description"),
        thumbnail: str_field(json, "thumbnail"),
        tags: json.get("tags").and_then(Value::as_array).map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        }),
        e_data: ExtData::new(Value::Object(e_data)),
    })
}

fn map_track(index: usize, format: &Value, extractor: &str) -> Result<Track> {
    let num = |key: &str| format.get(key).and_then(Value::as_f64);
    let vcodec = str_field(format, "vcodec");
    let acodec = str_field(format, "acodec");
    let tbr = num("tbr");
    let vbr = num("vbr");
    let abr = num("abr");
    let br = [tbr, vbr, abr]
        .into_iter()
        .flatten()
        .find(|rate| *rate != 0.0);

    Ok(Track {
        format_id: str_field(format, "format_id")
            .ok_or_else(|| Error::validation(format!("formats[{index}]: missing format_id")))?,
        format: str_field(format, "format"),
        ext: str_field(format, "ext")
            .ok_or_else(|| Error::validation(format!("formats[{index}]: missing ext")))?,
        has_audio: Some(vcodec.as_deref() == Some("none") && acodec.as_deref() != Some("none")),
        has_video: Some(vcodec.as_deref() != Some("none")),
        vcodec,
        acodec,
        url: str_field(format, "url"),
        width: num("width"),
        height: num("height"),
        fps: num("fps"),
        tbr,
        abr,
        vbr,
        asr: num("asr"),
        br,
        filesize: num("filesize").or_else(|| num("filesize_approx")),
        e_data: ExtData::new(Value::Object(pick(format, TRACK_EXT_KEYS, extractor))),
    })
}

/// Chapters with a numeric start and a string title. End times that are not numbers become null.
fn chapters(json: &Value) -> Vec<Value> {
    let Some(items) = json.get("chapters").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|chapter| {
            let start = chapter.get("start_time").filter(|v| v.is_number())?;
            let title = chapter.get("title").filter(|v| v.is_string())?;
            let end = chapter
                .get("end_time")
                .filter(|v| v.is_number())
                .cloned()
                .unwrap_or(Value::Null);
            Some(serde_json::json!({
                "start_time": start,
                "end_time": end,
                "title": title,
            }))
        })
        .collect()
}

/// Copy the non-null `keys` of `json` into an object tagged with `__type`.
fn pick(json: &Value, keys: &[&str], tag: &str) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("__type".to_string(), Value::String(tag.to_string()));
    for key in keys {
        if let Some(value) = json.get(*key)
            && !value.is_null()
        {
            out.insert((*key).to_string(), value.clone());
        }
    }
    out
}

fn str_field(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_str(json: &Value, key: &str) -> Result<String> {
    str_field(json, key).ok_or_else(|| Error::validation(format!("source: missing {key}")))
}

/// Runs the extractor in buffered mode for metadata queries.
#[derive(Debug, Clone)]
pub struct Extractor {
    path: PathBuf,
    runner: ProcessRunner,
}

impl Extractor {
    pub fn new(path: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Quick detection with `--flat-playlist`.
    pub async fn url_info(&self, url: &str, cancel: &CancellationToken) -> Result<UrlInfo> {
        let json = self
            .dump_json(&["--dump-single-json", "--flat-playlist", url], cancel)
            .await?;
        Ok(map_to_url_info(&json))
    }

    /// Full metadata of a single video.
    pub async fn source_file(&self, url: &str, cancel: &CancellationToken) -> Result<SourceFile> {
        let json = self.dump_json(&["--dump-single-json", url], cancel).await?;
        map_to_source_file(&json)
    }

    async fn dump_json(&self, args: &[&str], cancel: &CancellationToken) -> Result<Value> {
        let tool = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        debug!(tool = %tool, ?args, "Querying extractor");

        let output = self
            .runner
            .run_buffered(&self.path, &args, cancel)
            .await
            .map_err(|e| Error::process(&tool, format!("could not be started: {e}")))?;

        match output.outcome.status {
            RunStatus::Completed => Ok(serde_json::from_str(&output.stdout)?),
            RunStatus::Aborted | RunStatus::Terminated => Err(Error::Aborted),
            RunStatus::Failed => {
                let stderr = output.stderr.trim();
                let status = match (stderr.is_empty(), output.outcome.code) {
                    (false, _) => format!("failed: {stderr}"),
                    (true, Some(code)) => format!("failed with exit code {code}"),
                    (true, None) => "was killed by a signal".to_string(),
                };
                Err(Error::process(&tool, status))
            }
        }
    }
}
