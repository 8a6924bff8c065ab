//! Test doubles for the key-value service

use std::collections::HashSet;
use std::io;
use std::sync::Mutex;

use serde_json::Value;

use super::{KeyValueStore, MemoryStore, StoreError};

/// In-memory store whose records can be made unavailable one key at a time
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every later access to `key` fails with an IO error
    pub(crate) fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("record {} is unavailable", key),
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.remove(key).await
    }
}
