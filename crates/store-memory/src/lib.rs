//! In-memory implementation of key-value storage.
//!
//! Scopes share the underlying map and are separated by key prefix, so a
//! scoped store and its parent observe the same data.
#![warn(missing_docs)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use meridian_store::{Store, Store1};
use tokio::sync::Mutex;

const SCOPE_SEPARATOR: char = ':';

/// In-memory key-value store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    map: Arc<Mutex<HashMap<String, Bytes>>>,
    prefix: Option<String>,
}

impl MemoryStore {
    /// Creates a new `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get_key<K: Into<String>>(&self, key: K) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{SCOPE_SEPARATOR}{}", key.into()),
            None => key.into(),
        }
    }

    fn strip_scope<'a>(&self, key: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(SCOPE_SEPARATOR)),
            None => Some(key),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Error = Error;

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error> {
        self.map.lock().await.remove(&self.get_key(key));
        Ok(())
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map.get(&self.get_key(key)).cloned())
    }

    async fn keys(&self) -> Result<Vec<String>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map
            .keys()
            .filter_map(|key| self.strip_scope(key))
            .map(str::to_string)
            .collect())
    }

    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error> {
        self.map.lock().await.insert(self.get_key(key), bytes);
        Ok(())
    }
}

/// Unscoped handle producing [`MemoryStore`]s that share one map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore1 {
    map: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStore1 {
    /// Creates a new `MemoryStore1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store1 for MemoryStore1 {
    type Error = Error;
    type Scoped = MemoryStore;

    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped {
        MemoryStore {
            map: self.map.clone(),
            prefix: Some(scope.into()),
        }
    }
}
