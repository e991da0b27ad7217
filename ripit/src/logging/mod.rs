//! Logging setup: env filter, stderr console, daily rolling file.
//!
//! Stdout is reserved for the event transport, so the console layer writes to stderr.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::utils::fs;
use crate::{Error, Result};

pub const DEFAULT_LOG_FILTER: &str = "ripit=info,process_utils=info";

/// Rolling log file prefix; rotated files are `ripit.log.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "ripit.log";

const KEEP_LOG_DAYS: i64 = 7;
const SWEEP_EVERY: Duration = Duration::from_secs(24 * 60 * 60);
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format(TIMESTAMP_FORMAT))
    }
}

/// Delete stale rotated logs in `log_dir` now, then once a day until `cancel` fires.
pub fn spawn_retention(log_dir: PathBuf, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            match sweep_logs(&log_dir, KEEP_LOG_DAYS).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed stale log files"),
                Err(e) => warn!(dir = %log_dir.display(), error = %e, "Log sweep failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(SWEEP_EVERY) => {}
            }
        }
        debug!("Log retention stopped");
    });
}

/// Date suffix of a rotated log file name.
fn rotated_on(file_name: &str) -> Option<NaiveDate> {
    let date = file_name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Remove rotated logs dated before `keep_days` ago. Returns how many went.
async fn sweep_logs(dir: &Path, keep_days: i64) -> std::io::Result<usize> {
    let oldest_kept = (Utc::now() - chrono::Duration::days(keep_days)).date_naive();
    let mut removed = 0;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let stale = entry
            .file_name()
            .to_str()
            .and_then(rotated_on)
            .is_some_and(|date| date < oldest_kept);
        if !stale || !entry.file_type().await?.is_file() {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed stale log file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove log file"),
        }
    }
    Ok(removed)
}

/// Install the global subscriber. `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`].
///
/// The returned guard flushes the file writer when dropped, so hold it until exit.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    fs::ensure_dir_all_sync_with_op("creating log directory", log_dir)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console = fmt::layer().with_writer(std::io::stderr).with_timer(LocalTime);
    let file = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_timer(LocalTime);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Other(format!("installing log subscriber: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotated_on() {
        assert_eq!(
            rotated_on("ripit.log.2024-02-29"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(rotated_on("ripit.log"), None);
        assert_eq!(rotated_on("ripit.log.old"), None);
        assert_eq!(rotated_on("other.log.2024-02-29"), None);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_rotated_logs() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("ripit.log.2001-01-01");
        let today = dir
            .path()
            .join(format!("ripit.log.{}", Utc::now().format("%Y-%m-%d")));
        let unrelated = dir.path().join("queue.json");
        for path in [&stale, &today, &unrelated] {
            tokio::fs::write(path, b"x").await.unwrap();
        }

        assert_eq!(sweep_logs(dir.path(), KEEP_LOG_DAYS).await.unwrap(), 1);
        assert!(!stale.exists());
        assert!(today.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_retention_sweeps_on_start() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("ripit.log.2001-01-01");
        tokio::fs::write(&stale, b"x").await.unwrap();

        let cancel = CancellationToken::new();
        spawn_retention(dir.path().to_path_buf(), cancel.clone());
        for _ in 0..50 {
            if !stale.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        assert!(!stale.exists());
    }
}
