//! Persisted media queue.
//!
//! The in-memory list is the source of truth. Every mutation schedules a full-array write
//! through the [`SafeFileWriter`] while the list lock is held, so disk writes are applied in
//! mutation order.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::rotation::BackupRotation;
use super::validation::{InvalidRecord, Validated, validated_clone};
use super::writer::SafeFileWriter;
use crate::domain::{EventKind, MediaFileData};
use crate::tasks::EventSink;
use crate::utils::fs;
use crate::{Error, Result};

#[derive(Default)]
struct QueueState {
    files: Vec<MediaFileData>,
    invalid: Vec<InvalidRecord>,
}

pub struct QueueStore {
    writer: SafeFileWriter,
    rotation: BackupRotation,
    events: EventSink,
    state: Mutex<QueueState>,
}

impl QueueStore {
    /// Create a store over `file_path`; backups go next to it.
    pub fn new(file_path: impl Into<PathBuf>, max_backups: usize, events: EventSink) -> Self {
        let file_path = file_path.into();
        let backup_dir = file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            writer: SafeFileWriter::new(file_path),
            rotation: BackupRotation::new(backup_dir, max_backups),
            events,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn file_path(&self) -> &Path {
        self.writer.path()
    }

    /// Load and validate the queue file, creating it with `[]` when missing.
    ///
    /// Invalid entries are isolated, never dropped silently. A backup is taken only after a
    /// load with at least one entry and no invalid ones.
    pub async fn init(&self) -> Result<()> {
        let path = self.file_path().to_path_buf();
        fs::ensure_parent_dir_with_op("creating data directory", &path).await?;

        let raw = match self.writer.read().await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No queue file found, creating an empty one");
                self.writer.schedule_write(&Vec::<MediaFileData>::new())?;
                self.writer.flush().await?;
                "[]".to_string()
            }
            Err(e) => return Err(Error::persistence("reading queue file", &path, e)),
        };

        let Validated { valid, invalid } = match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => validated_clone(&parsed),
            Err(e) => Validated {
                valid: Vec::new(),
                invalid: vec![InvalidRecord {
                    index: -1,
                    error: format!("Invalid JSON: {e}"),
                    raw_record: Value::String(raw),
                }],
            },
        };

        for record in &invalid {
            error!(index = record.index, error = %record.error, "Invalid queue entry");
        }
        info!(
            valid = valid.len(),
            invalid = invalid.len(),
            "Queue loaded"
        );

        let rotate = !valid.is_empty() && invalid.is_empty();
        {
            let mut state = self.state.lock();
            state.files = valid;
            state.invalid = invalid;
        }

        if rotate && let Err(e) = self.rotation.rotate_and_backup(&path).await {
            warn!(error = %e, "Queue backup failed");
        }

        Ok(())
    }

    /// Append a new entry. Returns `false` (and writes nothing) when the id already exists.
    pub fn add(&self, file: MediaFileData) -> Result<bool> {
        let mut state = self.state.lock();
        if state.files.iter().any(|f| f.id == file.id) {
            debug!(file_id = %file.id, "Queue entry already exists");
            return Ok(false);
        }
        debug!(file_id = %file.id, "Queue entry added");
        state.files.push(file);
        self.writer.schedule_write(&state.files)?;
        Ok(true)
    }

    /// Replace the entry with the same id. Returns `false` when the id is unknown.
    pub fn update(&self, file: MediaFileData) -> Result<bool> {
        self.modify(&file.id.clone(), move |slot| *slot = file)
    }

    /// Edit an entry in place. Returns `false` when the id is unknown.
    pub fn modify<F>(&self, id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut MediaFileData),
    {
        let mut state = self.state.lock();
        let Some(slot) = state.files.iter_mut().find(|file| file.id == id) else {
            debug!(file_id = %id, "Queue entry not found");
            return Ok(false);
        };
        f(slot);
        self.writer.schedule_write(&state.files)?;
        Ok(true)
    }

    /// Remove every entry whose id is listed. Returns how many were removed.
    pub fn remove_files(&self, ids: &[String]) -> Result<usize> {
        let mut state = self.state.lock();
        let before = state.files.len();
        state.files.retain(|file| !ids.contains(&file.id));
        let removed = before - state.files.len();
        self.writer.schedule_write(&state.files)?;
        debug!(removed, "Queue entries removed");
        Ok(removed)
    }

    /// Independent copy of the current list.
    pub fn get_list(&self) -> Vec<MediaFileData> {
        self.state.lock().files.clone()
    }

    pub fn get(&self, id: &str) -> Option<MediaFileData> {
        self.state
            .lock()
            .files
            .iter()
            .find(|file| file.id == id)
            .cloned()
    }

    /// Entries rejected by the last load.
    pub fn invalid_entries(&self) -> Vec<InvalidRecord> {
        self.state.lock().invalid.clone()
    }

    /// Broadcast the current list to subscribers.
    pub fn request_list(&self) {
        let list = self.get_list();
        match serde_json::to_value(&list) {
            Ok(payload) => self.events.broadcast(EventKind::MediaFilesList, payload),
            Err(e) => error!(error = %e, "Failed to serialise queue list"),
        }
    }

    /// Wait until every scheduled write has reached the disk.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }
}
