//! Persistence layer
//!
//! Everything taskrank keeps between runs lives in a small async key-value
//! service with three records:
//!
//! ```text
//! apiKey    # the oracle credential (see `credential`)
//! todos     # the task collection, stored pre-sorted
//! theme     # "light" | "dark"
//! ```
//!
//! `MemoryStore` backs tests and ephemeral sessions; `JsonFileStore` keeps all
//! records in a single JSON object on disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::models::{Task, Theme};
use crate::ranking::is_sorted;

#[cfg(test)]
pub(crate) mod testing;

/// Key of the task collection record
pub const TASKS_KEY: &str = "todos";
/// Key of the theme preference record
pub const THEME_KEY: &str = "theme";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store file {0} does not contain a JSON object")]
    NotAnObject(PathBuf),

    #[error("Refusing to persist tasks: {0}")]
    Invariant(String),
}

/// Asynchronous key-value service holding JSON values
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Volatile store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Store that keeps every record in one JSON object file
///
/// Writes go to a sibling temp file that is then renamed over the original,
/// so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject(self.path.clone())),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let bytes = serde_json::to_vec_pretty(&Value::Object(map))?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), value);
        self.write_all(map).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_all().await?;
        if map.remove(key).is_some() {
            self.write_all(map).await?;
        }
        Ok(())
    }
}

/// Typed access to the task collection and the theme preference
#[derive(Clone)]
pub struct TaskStore {
    store: Arc<dyn KeyValueStore>,
}

impl TaskStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Loads the persisted collection; a missing record is an empty list
    ///
    /// Stored priorities outside 1-10 are clamped as they are read.
    pub async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        match self.store.get(TASKS_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Writes the full collection back
    ///
    /// The collection must have unique ids, non-empty names and already be
    /// in rank order; anything else is rejected without touching storage.
    pub async fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(tasks.len());
        for task in tasks {
            if task.name().trim().is_empty() {
                return Err(StoreError::Invariant(format!(
                    "task {} has an empty name",
                    task.id()
                )));
            }
            if !seen.insert(task.id()) {
                return Err(StoreError::Invariant(format!(
                    "duplicate task id {}",
                    task.id()
                )));
            }
        }
        if !is_sorted(tasks) {
            return Err(StoreError::Invariant(
                "collection is not in rank order".to_string(),
            ));
        }

        self.store
            .set(TASKS_KEY, serde_json::to_value(tasks)?)
            .await
    }

    /// Returns the saved theme, or `None` when the user never picked one
    pub async fn load_theme(&self) -> Result<Option<Theme>, StoreError> {
        match self.store.get(THEME_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn save_theme(&self, theme: Theme) -> Result<(), StoreError> {
        self.store
            .set(THEME_KEY, serde_json::to_value(theme)?)
            .await
    }
}
