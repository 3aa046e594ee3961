//! Key-value store abstractions used for durable engine state
//!
//! A [`Store`] is a flat map from string keys to bytes. A [`Store1`] must be
//! given a scope before use, so that each partition gets its own keyspace.
#![warn(missing_docs)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker for errors produced by store backends.
pub trait StoreError: Debug + Error + Send + Sync + 'static {}

/// A key-value store with asynchronous operations.
///
/// Writes replace the previous value atomically: a concurrent or subsequent
/// `get` observes either the old value or the new one, never a mix.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// Error returned by this backend.
    type Error: StoreError;

    /// Deletes a key. Deleting a missing key is not an error.
    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error>;

    /// Retrieves the value associated with a key.
    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error>;

    /// Retrieves all keys in the store, in no particular order.
    async fn keys(&self) -> Result<Vec<String>, Self::Error>;

    /// Stores a key-value pair.
    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error>;
}

/// A key-value store that needs one scope before it is usable.
pub trait Store1: Clone + Send + Sync + 'static {
    /// Error returned by this backend.
    type Error: StoreError;

    /// The usable store produced by scoping.
    type Scoped: Store<Error = Self::Error>;

    /// Add a scope and make the store usable.
    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped;
}
