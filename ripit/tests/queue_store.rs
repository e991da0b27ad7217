//! Queue store persistence across restarts.

use std::path::Path;

use ripit::domain::{EventKind, MediaFileData, MediaStatus};
use ripit::store::QueueStore;
use ripit::store::rotation::BACKUP_PREFIX;
use ripit::tasks::EventSink;
use serde_json::{Value, json};
use tempfile::TempDir;

fn entry(id: &str) -> Value {
    let tracks = json!([{ "formatId": "22", "ext": "mp4", "hasAudio": true, "hasVideo": true }]);
    json!({
        "version": "1",
        "id": id,
        "status": "Added",
        "trackIds": tracks,
        "fileName": format!("File {id}"),
        "source": {
            "id": format!("src-{id}"),
            "title": format!("Title {id}"),
            "extractor": "vimeo",
            "webpageUrl": format!("https://example.com/{id}"),
            "tracks": tracks
        }
    })
}

fn media_file(id: &str) -> MediaFileData {
    serde_json::from_value(entry(id)).unwrap()
}

fn backups(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(BACKUP_PREFIX))
        .count()
}

async fn open(path: &Path) -> QueueStore {
    let (sink, _rx) = EventSink::channel();
    let store = QueueStore::new(path, 5, sink);
    store.init().await.unwrap();
    store
}

#[tokio::test]
async fn test_entries_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("queue.json");

    let store = open(&path).await;
    assert!(store.get_list().is_empty());
    assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");

    assert!(store.add(media_file("a")).unwrap());
    assert!(store.add(media_file("b")).unwrap());
    assert!(!store.add(media_file("a")).unwrap());
    assert!(
        store
            .modify("b", |file| file.status = MediaStatus::Loaded)
            .unwrap()
    );
    assert_eq!(store.remove_files(&["a".to_string()]).unwrap(), 1);
    store.flush().await.unwrap();

    let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk.as_array().unwrap().len(), 1);
    assert_eq!(on_disk[0]["id"], "b");
    assert_eq!(on_disk[0]["status"], "Loaded");

    drop(store);
    let reopened = open(&path).await;
    let list = reopened.get_list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "b");
    assert_eq!(list[0].status, MediaStatus::Loaded);
    assert!(reopened.invalid_entries().is_empty());
    assert_eq!(backups(path.parent().unwrap()), 1);
}

#[tokio::test]
async fn test_invalid_entries_are_isolated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");
    let raw = json!([entry("a"), { "id": "broken" }, entry("a"), entry("c")]);
    std::fs::write(&path, serde_json::to_string_pretty(&raw).unwrap()).unwrap();

    let store = open(&path).await;
    let ids: Vec<String> = store.get_list().into_iter().map(|file| file.id).collect();
    assert_eq!(ids, vec!["a", "c"]);

    let invalid = store.invalid_entries();
    assert_eq!(
        invalid.iter().map(|record| record.index).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(invalid[0].raw_record, json!({ "id": "broken" }));
    assert_eq!(backups(dir.path()), 0);
}

#[tokio::test]
async fn test_unparsable_file_loads_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = open(&path).await;
    assert!(store.get_list().is_empty());
    let invalid = store.invalid_entries();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].index, -1);
    assert_eq!(backups(dir.path()), 0);
}

#[tokio::test]
async fn test_request_list_broadcasts_snapshot() {
    let dir = TempDir::new().unwrap();
    let (sink, mut rx) = EventSink::channel();
    let store = QueueStore::new(dir.path().join("queue.json"), 5, sink);
    store.init().await.unwrap();
    store.add(media_file("a")).unwrap();

    store.request_list();
    let event = rx.recv().await.unwrap();
    assert!(event.is_broadcast());
    assert_eq!(event.kind, EventKind::MediaFilesList);
    assert_eq!(event.payload[0]["id"], "a");
}
