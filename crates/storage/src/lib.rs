//! Log storage traits for Meridian partitions
//!
//! Each partition keeps its record log in its own namespace. Backends store
//! indexed byte sequences and know nothing about the records inside them.

pub mod log;

pub use log::{
    LogStorage, LogStorageStreaming, LogStream, StorageError, StorageKey, StorageNamespace,
    StorageResult,
};
