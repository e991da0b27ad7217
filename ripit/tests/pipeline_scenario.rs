//! Media pipeline runs against shell scripts standing in for the external tools.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ripit::Error;
use ripit::config::{AppConfig, ToolPaths};
use ripit::domain::{EventKind, MediaFileData, MediaStatus, TaskEnvelope, TaskEvent, TaskKind};
use ripit::pipeline::markers::{Marker, chapters_file_name, marker_path, pending_dir};
use ripit::pipeline::{FreeSpaceProbe, MediaPipeline, OutputContainer, PipelineConfig};
use ripit::services::ServiceContainer;
use ripit::settings::{BASE_DOWNLOAD_DIR_KEY, MemorySettingsStore, SettingsStore};
use ripit::tasks::EventSink;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const EXTRACTOR_OK: &str = r#"#!/bin/sh
out=""
fmt=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -f) fmt="$2"; shift ;;
  esac
  shift
done
echo "$fmt" >> "$(dirname "$0")/extractor.calls"
echo "[download]  50.0% of 1.00MiB at 2.00MiB/s ETA 00:01"
echo "[download] 100.0% of 1.00MiB at 2.00MiB/s ETA 00:00"
printf 'track %s' "$fmt" > "$out"
"#;

const EXTRACTOR_FAIL: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) printf 'partial' > "$2"; shift ;;
  esac
  shift
done
echo "ERROR: Requested format is not available" >&2
exit 1
"#;

const EXTRACTOR_HANG: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) printf 'partial' > "$2"; shift ;;
  esac
  shift
done
exec sleep 30
"#;

const TRANSCODER_OK: &str = r#"#!/bin/sh
printf '%s\n' "$@" > "$(dirname "$0")/transcoder.args"
for last; do :; done
echo "frame=10"
echo "fps=25"
echo "progress=continue"
echo "frame=20"
echo "progress=end"
printf 'merged' > "$last"
"#;

const TRANSCODER_SILENT: &str = r#"#!/bin/sh
echo "progress=end"
exit 0
"#;

const PROBER_OK: &str = r#"#!/bin/sh
echo '{"format":{"format_name":"matroska"}}'
"#;

const PROBER_FAIL: &str = r#"#!/bin/sh
echo "moov atom not found" >&2
exit 7
"#;

struct Plenty;

impl FreeSpaceProbe for Plenty {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        Some(1 << 40)
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn tools(bin: &Path, extractor: &str) -> ToolPaths {
    tools_with(bin, extractor, TRANSCODER_OK, PROBER_OK)
}

fn tools_with(bin: &Path, extractor: &str, transcoder: &str, prober: &str) -> ToolPaths {
    std::fs::create_dir_all(bin).unwrap();
    ToolPaths {
        extractor: write_script(bin, "yt-dlp", extractor),
        transcoder: write_script(bin, "ffmpeg", transcoder),
        prober: write_script(bin, "ffprobe", prober),
    }
}

fn pipeline(tools: ToolPaths) -> MediaPipeline {
    MediaPipeline::new(PipelineConfig {
        tools,
        container: OutputContainer::Mkv,
        force_kill_delay: Duration::from_millis(500),
    })
    .with_space_probe(Arc::new(Plenty))
}

fn media_file(id: &str) -> MediaFileData {
    let tracks = json!([
        { "formatId": "137", "ext": "mp4", "vcodec": "avc1" },
        { "formatId": "251", "ext": "webm", "vcodec": "none", "acodec": "opus" }
    ]);
    serde_json::from_value(json!({
        "version": "1",
        "id": id,
        "status": "Added",
        "trackIds": tracks,
        "fileName": format!("file-{id}"),
        "source": {
            "id": format!("src-{id}"),
            "title": "Scenario",
            "extractor": "youtube",
            "webpageUrl": format!("https://example.com/watch?v={id}"),
            "tracks": tracks,
            "eData": {
                "__type": "youtube",
                "chapters": [
                    { "start_time": 0, "end_time": 5, "title": "Intro" },
                    { "start_time": 5, "end_time": 10, "title": "Main" }
                ]
            }
        }
    }))
    .unwrap()
}

fn drain(rx: &mut UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn messages(events: &[TaskEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| event.message.clone())
        .collect()
}

#[tokio::test]
async fn test_existing_track_is_skipped_and_both_are_merged() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    let out = dir.path().join("out");
    let file = media_file("f1");

    let pending = pending_dir(&out);
    std::fs::create_dir_all(&pending).unwrap();
    let first_final = marker_path(&pending, &file.source.id, &file.track_ids[0], Marker::Final);
    std::fs::write(&first_final, "track 137").unwrap();

    let (sink, mut rx) = EventSink::channel();
    let output = pipeline(tools(&bin, EXTRACTOR_OK))
        .run(&file, &out, &sink.for_task("t1"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.path, out.join("file-f1.mkv"));
    assert_eq!(output.size, "merged".len() as u64);

    let events = drain(&mut rx);
    let messages = messages(&events);
    let skipped: Vec<_> = messages
        .iter()
        .filter(|m| m.contains("already downloaded"))
        .collect();
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0].starts_with("Track 137 already downloaded"));
    assert!(messages.contains(&"Downloading track 251".to_string()));
    assert!(
        messages
            .iter()
            .any(|m| m.starts_with("Track 251 downloaded successfully"))
    );
    assert!(messages.contains(&"Generating chapter track for file 'Scenario'".to_string()));
    assert!(messages.contains(&"Running ffmpeg to merge tracks".to_string()));

    let stages: Vec<u64> = events
        .iter()
        .filter_map(|event| event.payload["stage"].as_u64())
        .collect();
    for stage in [1, 2, 3, 4, 5] {
        assert!(stages.contains(&stage), "missing stage {stage}");
    }
    let merge_progress = events
        .iter()
        .filter(|event| event.message.as_deref() == Some("Merging tracks in progress..."))
        .count();
    assert_eq!(merge_progress, 2);

    let calls = std::fs::read_to_string(bin.join("extractor.calls")).unwrap();
    assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["251"]);

    let second_final = marker_path(&pending, &file.source.id, &file.track_ids[1], Marker::Final);
    let second_temp = marker_path(&pending, &file.source.id, &file.track_ids[1], Marker::Temp);
    assert!(second_final.exists());
    assert!(!second_temp.exists());

    let args = std::fs::read_to_string(bin.join("transcoder.args")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    let inputs: Vec<&str> = args
        .windows(2)
        .filter(|pair| pair[0] == "-i")
        .map(|pair| pair[1])
        .collect();
    assert_eq!(
        inputs,
        vec![
            first_final.to_str().unwrap(),
            second_final.to_str().unwrap(),
            pending.join(chapters_file_name("src-f1")).to_str().unwrap(),
        ]
    );
    assert!(args.windows(2).any(|pair| pair == ["-map_metadata", "2"]));
    assert!(args.windows(2).any(|pair| pair == ["-metadata", "file_id=f1"]));
}

#[tokio::test]
async fn test_failed_download_removes_temp_marker() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    let out = dir.path().join("out");
    let file = media_file("f2");

    let (sink, _rx) = EventSink::channel();
    let err = pipeline(tools(&bin, EXTRACTOR_FAIL))
        .run(&file, &out, &sink.for_task("t2"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(2));
    assert_eq!(err.to_string(), "yt-dlp failed with exit code 1");

    let pending = pending_dir(&out);
    let temp = marker_path(&pending, &file.source.id, &file.track_ids[0], Marker::Temp);
    assert!(!temp.exists());
    assert!(!out.join("file-f2.mkv").exists());
}

#[tokio::test]
async fn test_merge_without_output_fails_at_result_stage() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    let out = dir.path().join("out");
    let file = media_file("f5");

    let (sink, _rx) = EventSink::channel();
    let err = pipeline(tools_with(&bin, EXTRACTOR_OK, TRANSCODER_SILENT, PROBER_OK))
        .run(&file, &out, &sink.for_task("t5"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(6));
    let Error::StageFailed { source, .. } = &err else {
        panic!("expected a stage failure, got {err:?}");
    };
    assert!(matches!(**source, Error::Resource(_)), "got {source:?}");
    assert!(err.to_string().contains("Final file not created or empty"));
    assert!(!out.join("file-f5.mkv").exists());
}

#[tokio::test]
async fn test_failed_prober_does_not_fail_the_run() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    let out = dir.path().join("out");
    let file = media_file("f6");

    let (sink, _rx) = EventSink::channel();
    let output = pipeline(tools_with(&bin, EXTRACTOR_OK, TRANSCODER_OK, PROBER_FAIL))
        .run(&file, &out, &sink.for_task("t6"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.path, out.join("file-f6.mkv"));
    assert_eq!(output.size, "merged".len() as u64);
}

#[tokio::test]
async fn test_abort_stops_the_running_tool() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    let out = dir.path().join("out");
    let file = media_file("f3");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let (sink, _rx) = EventSink::channel();
    let started = std::time::Instant::now();
    let err = pipeline(tools(&bin, EXTRACTOR_HANG))
        .run(&file, &out, &sink.for_task("t3"), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_aborted());
    assert_eq!(err.stage(), Some(2));
    assert!(started.elapsed() < Duration::from_secs(10));

    let pending = pending_dir(&out);
    let temp = marker_path(&pending, &file.source.id, &file.track_ids[0], Marker::Temp);
    assert!(!temp.exists());
}

#[tokio::test]
async fn test_download_task_updates_queue_entry() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    let out = dir.path().join("out");
    let tools = tools(&bin, EXTRACTOR_OK);

    let config = AppConfig {
        data_dir: dir.path().join("data"),
        bin_dir: bin.clone(),
        log_dir: dir.path().join("logs"),
        extractor: Some(tools.extractor),
        transcoder: Some(tools.transcoder),
        prober: Some(tools.prober),
        ..AppConfig::default()
    };
    let settings = Arc::new(MemorySettingsStore::new());
    settings
        .set(BASE_DOWNLOAD_DIR_KEY, json!(out.to_string_lossy()))
        .await
        .unwrap();

    let (services, mut rx) = ServiceContainer::with_settings(config, settings)
        .await
        .unwrap();
    let file = media_file("f4");
    assert!(services.queue.add(file.clone()).unwrap());

    let ids = services
        .dispatcher
        .submit(TaskEnvelope {
            task_type: TaskKind::DownloadMediaFiles.as_str().to_string(),
            payload: json!([file]),
        })
        .unwrap();
    assert_eq!(ids.len(), 1);

    let result = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.task_id == ids[0] && event.kind != EventKind::Progress {
                return event;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(result.kind, EventKind::Result);
    assert_eq!(
        result.message.as_deref(),
        Some("File 'Scenario' downloaded and merged successfully")
    );
    assert_eq!(result.payload["fileId"], "f4");
    assert_eq!(result.payload["stage"], 6);
    assert_eq!(result.payload["fileSize"], "6 bytes");

    let stored = services.queue.get("f4").unwrap();
    assert_eq!(stored.status, MediaStatus::Loaded);
    assert_eq!(stored.size, Some(6));
    assert!(stored.created.is_some());

    services.shutdown().await.unwrap();
}
