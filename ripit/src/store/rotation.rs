//! Timestamped backups of the queue file with a count cap.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::utils::fs::io_error;
use crate::{Error, Result};

pub const BACKUP_PREFIX: &str = "queue_";
const BACKUP_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct BackupRotation {
    dir: PathBuf,
    max_backups: usize,
}

impl BackupRotation {
    pub fn new(dir: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            dir: dir.into(),
            max_backups,
        }
    }

    /// Copy `current` to `queue_{unix_ms}.json`, then evict the oldest backups over the cap.
    pub async fn rotate_and_backup(&self, current: &Path) -> Result<PathBuf> {
        let name = format!(
            "{BACKUP_PREFIX}{}{BACKUP_SUFFIX}",
            chrono::Utc::now().timestamp_millis()
        );
        let backup = self.dir.join(name);

        tokio::fs::copy(current, &backup)
            .await
            .map_err(|e| Error::persistence("creating backup", &backup, e))?;
        info!(path = %backup.display(), "Queue backup created");

        self.prune().await?;
        Ok(backup)
    }

    /// Backups sorted oldest first by modification time.
    pub async fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error("listing backups", &self.dir, e))?;

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing backups", &self.dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !(name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, entry.path()));
        }

        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    async fn prune(&self) -> Result<usize> {
        let backups = self.list_backups().await?;
        let excess = backups.len().saturating_sub(self.max_backups);

        let mut deleted = 0;
        for path in backups.into_iter().take(excess) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted oldest backup");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete backup"),
            }
        }
        Ok(deleted)
    }
}
