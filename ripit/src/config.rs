//! Application configuration.
//!
//! Values come from `RIPIT_*` environment variables (a `.env` file is honoured), falling back
//! to platform defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::OutputContainer;
use crate::{Error, Result};

/// Default extractor executable name (without platform suffix).
pub const DEFAULT_EXTRACTOR: &str = "yt-dlp";
/// Default transcoder executable name.
pub const DEFAULT_TRANSCODER: &str = "ffmpeg";
/// Default prober executable name.
pub const DEFAULT_PROBER: &str = "ffprobe";

const QUEUE_FILE_NAME: &str = "queue.json";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Queue file, settings file and queue backups.
    pub data_dir: PathBuf,
    /// Directory holding the external tools.
    pub bin_dir: PathBuf,
    pub log_dir: PathBuf,
    pub force_kill_delay_ms: u64,
    pub max_backups: usize,
    /// Cap for the concurrent lane. `None` runs every task immediately.
    pub max_concurrent_tasks: Option<usize>,
    /// Monitor intervals at or below this are replaced by the fallback.
    pub monitor_floor_ms: u64,
    pub monitor_fallback_ms: u64,
    /// Container of merged files.
    pub output_container: OutputContainer,
    pub extractor: Option<PathBuf>,
    pub transcoder: Option<PathBuf>,
    pub prober: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ripit");
        Self {
            bin_dir: data_dir.clone(),
            log_dir: data_dir.join("logs"),
            data_dir,
            force_kill_delay_ms: 5000,
            max_backups: 10,
            max_concurrent_tasks: None,
            monitor_floor_ms: 100,
            monitor_fallback_ms: 2000,
            output_container: OutputContainer::default(),
            extractor: None,
            transcoder: None,
            prober: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let data_dir = lookup("RIPIT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let bin_dir = lookup("RIPIT_BIN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.clone());
        let log_dir = lookup("RIPIT_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));

        Ok(Self {
            force_kill_delay_ms: parse_var(&lookup, "RIPIT_FORCE_KILL_DELAY_MS")?
                .unwrap_or(defaults.force_kill_delay_ms),
            max_backups: parse_var(&lookup, "RIPIT_MAX_BACKUPS")?.unwrap_or(defaults.max_backups),
            max_concurrent_tasks: parse_var::<usize, _>(&lookup, "RIPIT_MAX_CONCURRENT_TASKS")?
                .filter(|limit| *limit > 0),
            monitor_floor_ms: parse_var(&lookup, "RIPIT_MONITOR_FLOOR_MS")?
                .unwrap_or(defaults.monitor_floor_ms),
            monitor_fallback_ms: parse_var(&lookup, "RIPIT_MONITOR_FALLBACK_MS")?
                .unwrap_or(defaults.monitor_fallback_ms),
            output_container: parse_var(&lookup, "RIPIT_OUTPUT_CONTAINER")?
                .unwrap_or(defaults.output_container),
            extractor: lookup("RIPIT_EXTRACTOR").map(PathBuf::from),
            transcoder: lookup("RIPIT_TRANSCODER").map(PathBuf::from),
            prober: lookup("RIPIT_PROBER").map(PathBuf::from),
            data_dir,
            bin_dir,
            log_dir,
            ..defaults
        })
    }

    pub fn queue_file(&self) -> PathBuf {
        self.data_dir.join(QUEUE_FILE_NAME)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE_NAME)
    }

    pub fn force_kill_delay(&self) -> Duration {
        Duration::from_millis(self.force_kill_delay_ms)
    }

    pub fn monitor_floor(&self) -> Duration {
        Duration::from_millis(self.monitor_floor_ms)
    }

    pub fn monitor_fallback(&self) -> Duration {
        Duration::from_millis(self.monitor_fallback_ms)
    }

    /// Resolve the external tool paths, honouring explicit overrides.
    pub fn tool_paths(&self) -> ToolPaths {
        let in_bin = ToolPaths::in_dir(&self.bin_dir);
        ToolPaths {
            extractor: self.extractor.clone().unwrap_or(in_bin.extractor),
            transcoder: self.transcoder.clone().unwrap_or(in_bin.transcoder),
            prober: self.prober.clone().unwrap_or(in_bin.prober),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("{key}={raw}: {e}"))),
    }
}

/// Resolved locations of the external tools, consumed read-only by the process runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub extractor: PathBuf,
    pub transcoder: PathBuf,
    pub prober: PathBuf,
}

impl ToolPaths {
    /// Default tool names inside `dir`, with the platform executable suffix.
    pub fn in_dir(dir: &Path) -> Self {
        let exe = |name: &str| dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX));
        Self {
            extractor: exe(DEFAULT_EXTRACTOR),
            transcoder: exe(DEFAULT_TRANSCODER),
            prober: exe(DEFAULT_PROBER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_follow_data_dir() {
        let config = AppConfig::from_lookup(lookup(&[("RIPIT_DATA_DIR", "/srv/ripit")])).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/ripit"));
        assert_eq!(config.bin_dir, PathBuf::from("/srv/ripit"));
        assert_eq!(config.log_dir, PathBuf::from("/srv/ripit/logs"));
        assert_eq!(config.queue_file(), PathBuf::from("/srv/ripit/queue.json"));
        assert_eq!(config.force_kill_delay(), Duration::from_secs(5));
        assert_eq!(config.max_backups, 10);
        assert_eq!(config.max_concurrent_tasks, None);
    }

    #[test]
    fn test_numeric_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("RIPIT_FORCE_KILL_DELAY_MS", "250"),
            ("RIPIT_MAX_BACKUPS", "3"),
            ("RIPIT_MAX_CONCURRENT_TASKS", "4"),
            ("RIPIT_MONITOR_FALLBACK_MS", "500"),
        ]))
        .unwrap();

        assert_eq!(config.force_kill_delay_ms, 250);
        assert_eq!(config.max_backups, 3);
        assert_eq!(config.max_concurrent_tasks, Some(4));
        assert_eq!(config.monitor_fallback(), Duration::from_millis(500));
        assert_eq!(config.monitor_floor_ms, 100);
    }

    #[test]
    fn test_output_container() {
        let config = AppConfig::from_lookup(lookup(&[("RIPIT_OUTPUT_CONTAINER", "MP4")])).unwrap();
        assert_eq!(config.output_container, OutputContainer::Mp4);

        let err = AppConfig::from_lookup(lookup(&[("RIPIT_OUTPUT_CONTAINER", "avi")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_concurrency_means_unbounded() {
        let config =
            AppConfig::from_lookup(lookup(&[("RIPIT_MAX_CONCURRENT_TASKS", "0")])).unwrap();
        assert_eq!(config.max_concurrent_tasks, None);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = AppConfig::from_lookup(lookup(&[("RIPIT_MAX_BACKUPS", "many")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_tool_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("RIPIT_BIN_DIR", "/opt/bin"),
            ("RIPIT_TRANSCODER", "/usr/bin/ffmpeg"),
        ]))
        .unwrap();
        let tools = config.tool_paths();

        assert_eq!(tools.transcoder, PathBuf::from("/usr/bin/ffmpeg"));
        assert!(tools.extractor.starts_with("/opt/bin"));
        assert!(
            tools
                .prober
                .to_string_lossy()
                .contains(DEFAULT_PROBER)
        );
    }
}
