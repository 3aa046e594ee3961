//! Log storage abstraction
//!
//! Entries are addressed by a monotonically increasing index. An append must
//! continue directly after the last index of the namespace, which lets a
//! backend detect two writers racing on the same log.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Display;
use tokio_stream::Stream;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of `(index, entry)` pairs yielded in index order
pub type LogStream = Box<dyn Stream<Item = StorageResult<(u64, Bytes)>> + Send + Unpin>;

/// Errors that can occur in storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage backend error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Append did not continue the log where it ended
    #[error("Index conflict in {namespace}: expected {expected}, got {actual}")]
    IndexConflict {
        /// Namespace of the log
        namespace: String,
        /// Next index the log accepts
        expected: u64,
        /// Index that was offered
        actual: u64,
    },

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key in the storage system
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(pub Bytes);

impl StorageKey {
    /// Create a new storage key from bytes
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self(key.into())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

/// A namespace holding one independent log
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageNamespace(String);

impl StorageNamespace {
    /// Create a new storage namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the namespace as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StorageNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only log of indexed byte sequences
#[async_trait]
pub trait LogStorage: Clone + Send + Sync + 'static {
    /// Atomically append entries
    ///
    /// The first entry must carry `last_index + 1` (any index on an empty log)
    /// and the rest must follow contiguously, otherwise nothing is written and
    /// [`StorageError::IndexConflict`] is returned.
    async fn append(
        &self,
        namespace: &StorageNamespace,
        entries: Vec<(u64, Bytes)>,
    ) -> StorageResult<()>;

    /// Get the current bounds of the log (first_index, last_index)
    async fn bounds(&self, namespace: &StorageNamespace) -> StorageResult<Option<(u64, u64)>>;

    /// Remove all entries up to and including the given index
    async fn compact_before(&self, namespace: &StorageNamespace, index: u64) -> StorageResult<()>;

    /// Read a range of entries [start, end)
    async fn read_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<(u64, Bytes)>>;

    /// Remove all entries after the given index
    async fn truncate_after(&self, namespace: &StorageNamespace, index: u64) -> StorageResult<()>;
}

/// Log storage that can stream long ranges without materializing them
#[async_trait]
pub trait LogStorageStreaming: LogStorage {
    /// Stream entries from `start` up to `end` (exclusive), or to the last entry when `end` is None
    ///
    /// Entries are yielded in index order. Appends racing with the stream may
    /// or may not be observed.
    async fn stream_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: Option<u64>,
    ) -> StorageResult<LogStream>;
}

#[async_trait]
impl<T: LogStorage> LogStorage for std::sync::Arc<T> {
    async fn append(
        &self,
        namespace: &StorageNamespace,
        entries: Vec<(u64, Bytes)>,
    ) -> StorageResult<()> {
        (**self).append(namespace, entries).await
    }

    async fn bounds(&self, namespace: &StorageNamespace) -> StorageResult<Option<(u64, u64)>> {
        (**self).bounds(namespace).await
    }

    async fn compact_before(&self, namespace: &StorageNamespace, index: u64) -> StorageResult<()> {
        (**self).compact_before(namespace, index).await
    }

    async fn read_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<(u64, Bytes)>> {
        (**self).read_range(namespace, start, end).await
    }

    async fn truncate_after(&self, namespace: &StorageNamespace, index: u64) -> StorageResult<()> {
        (**self).truncate_after(namespace, index).await
    }
}

#[async_trait]
impl<T: LogStorageStreaming> LogStorageStreaming for std::sync::Arc<T> {
    async fn stream_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: Option<u64>,
    ) -> StorageResult<LogStream> {
        (**self).stream_range(namespace, start, end).await
    }
}
