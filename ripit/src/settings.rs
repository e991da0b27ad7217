//! Key/value settings contract and the app settings read through it.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::SafeFileWriter;
use crate::{Error, Result};

/// Key holding the download root.
pub const BASE_DOWNLOAD_DIR_KEY: &str = "baseDownloadDir";

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Settings persisted as one JSON object.
pub struct JsonSettingsStore {
    writer: SafeFileWriter,
    values: Mutex<Map<String, Value>>,
}

impl JsonSettingsStore {
    /// Open the settings file. A missing or unreadable object starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let writer = SafeFileWriter::new(path);
        let values = match writer.read().await {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!(
                        path = %writer.path().display(),
                        "Settings file is not a JSON object, starting empty"
                    );
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(Error::persistence("reading settings", writer.path(), e)),
        };

        Ok(Self {
            writer,
            values: Mutex::new(values),
        })
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        {
            let mut values = self.values.lock();
            values.insert(key.to_string(), value);
            self.writer.schedule_write(&*values)?;
        }
        debug!(key, "Setting changed");
        self.writer.flush().await
    }
}

/// In-memory settings.
#[derive(Default)]
pub struct MemorySettingsStore {
    values: Mutex<Map<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub base_download_dir: PathBuf,
}

impl AppSettings {
    /// Read from the store, falling back to the platform download directory.
    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        let base_download_dir = store
            .get(BASE_DOWNLOAD_DIR_KEY)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_download_dir);
        Ok(Self { base_download_dir })
    }
}

/// The user's download folder, or `~/Downloads`.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_value_falls_back() {
        let store = MemorySettingsStore::new();
        let settings = AppSettings::load(&store).await.unwrap();
        assert_eq!(settings.base_download_dir, default_download_dir());
    }

    #[tokio::test]
    async fn test_json_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonSettingsStore::open(&path).await.unwrap();
        store
            .set(BASE_DOWNLOAD_DIR_KEY, json!("/media/out"))
            .await
            .unwrap();
        drop(store);

        let reopened = JsonSettingsStore::open(&path).await.unwrap();
        let settings = AppSettings::load(&reopened).await.unwrap();
        assert_eq!(settings.base_download_dir, PathBuf::from("/media/out"));
    }

    #[tokio::test]
    async fn test_corrupt_settings_start_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"[1,2]").unwrap();

        let store = JsonSettingsStore::open(&path).await.unwrap();
        assert_eq!(store.get(BASE_DOWNLOAD_DIR_KEY).await.unwrap(), None);
    }
}
