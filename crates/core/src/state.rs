//! Named JSON blobs persisted per plugin key, last write wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state key `{0}` contains characters outside [a-z0-9_-]")]
    InvalidKey(String),
    #[error("state io failed for `{key}`: {source}")]
    Io { key: String, source: std::io::Error },
    #[error("state `{key}` is not valid json for its type: {source}")]
    Decode { key: String, source: serde_json::Error },
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>, StateError>;
    async fn save(&self, key: &str, value: &Value) -> Result<(), StateError>;
}

/// Stores each key as `<dir>/<key>.json`, written through a temp file and a rename.
#[derive(Clone, Debug)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory and checks that it accepts writes.
    pub async fn check_writable(&self) -> Result<(), StateError> {
        let io = |source| StateError::Io { key: ".write-check".to_string(), source };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;
        let marker = self.dir.join(".write-check");
        tokio::fs::write(&marker, b"ok").await.map_err(io)?;
        tokio::fs::remove_file(&marker).await.map_err(io)?;
        Ok(())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StateError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StateError> {
        let path = self.path_for(key)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { key: key.to_string(), source }),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StateError::Decode { key: key.to_string(), source })
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StateError> {
        let path = self.path_for(key)?;
        let io = |source| StateError::Io { key: key.to_string(), source };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;

        let encoded = serde_json::to_vec_pretty(value)
            .map_err(|source| StateError::Decode { key: key.to_string(), source })?;
        let staging = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&staging, encoded).await.map_err(io)?;
        tokio::fs::rename(&staging, &path).await.map_err(io)?;
        debug!(event_name = "state.saved", state_key = key, "plugin state flushed");
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self, key: &str) -> Option<Value> {
        self.entries.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StateError> {
        validate_key(key)?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StateError> {
        validate_key(key)?;
        self.entries.lock().await.insert(key.to_string(), value.clone());
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), StateError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidKey(key.to_string()))
    }
}

/// Typed plugin state: loaded once (falling back to `T::default()`), flushed after each mutation.
pub struct PluginState<T> {
    key: String,
    store: Arc<dyn StateStore>,
    value: Mutex<T>,
}

impl<T> PluginState<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send,
{
    pub async fn load(
        store: Arc<dyn StateStore>,
        key: impl Into<String>,
    ) -> Result<Self, StateError> {
        let key = key.into();
        let value = match store.load(&key).await? {
            Some(raw) => serde_json::from_value(raw)
                .map_err(|source| StateError::Decode { key: key.clone(), source })?,
            None => T::default(),
        };
        Ok(Self { key, store, value: Mutex::new(value) })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self) -> T {
        self.value.lock().await.clone()
    }

    pub async fn read<R>(&self, reader: impl FnOnce(&T) -> R) -> R {
        reader(&*self.value.lock().await)
    }

    /// Applies `mutation` and persists the result before releasing the lock.
    pub async fn mutate<R>(&self, mutation: impl FnOnce(&mut T) -> R) -> Result<R, StateError> {
        let mut guard = self.value.lock().await;
        let result = mutation(&mut guard);
        let encoded = serde_json::to_value(&*guard)
            .map_err(|source| StateError::Decode { key: self.key.clone(), source })?;
        self.store.save(&self.key, &encoded).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tempfile::TempDir;

    use super::{FileStateStore, MemoryStateStore, PluginState, StateError, StateStore};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Recent {
        ids: Vec<String>,
    }

    #[tokio::test]
    async fn file_store_round_trips_and_reports_missing_keys() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileStateStore::new(dir.path().join("state"));

        assert!(store.load("character-quiz").await.expect("load").is_none());
        store.save("character-quiz", &json!({"recent": ["a"]})).await.expect("save");

        let loaded = store.load("character-quiz").await.expect("load").expect("present");
        assert_eq!(loaded, json!({"recent": ["a"]}));
        assert!(store.check_writable().await.is_ok());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_state_directory() {
        let store = MemoryStateStore::new();
        let error = store.save("../etc/passwd", &json!(null)).await.expect_err("invalid key");
        assert!(matches!(error, StateError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn plugin_state_flushes_after_each_mutation() {
        let store = MemoryStateStore::new();
        let state: PluginState<Recent> =
            PluginState::load(Arc::new(store.clone()), "character-quiz").await.expect("load");

        assert_eq!(state.get().await, Recent::default());
        state.mutate(|recent| recent.ids.push("yuru-yuri".to_string())).await.expect("mutate");

        assert_eq!(store.snapshot("character-quiz").await, Some(json!({"ids": ["yuru-yuri"]})));

        let reloaded: PluginState<Recent> =
            PluginState::load(Arc::new(store), "character-quiz").await.expect("reload");
        assert_eq!(reloaded.read(|recent| recent.ids.len()).await, 1);
    }
}
