//! Implementation of key-value storage using one file per key.
//!
//! Values are written to a temporary file in the same directory and renamed
//! over the destination, so a crash mid-write leaves either the old value or
//! the new one.
#![warn(missing_docs)]

mod error;

pub use error::Error;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use meridian_store::{Store, Store1};
use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tracing::warn;

const TEMP_PREFIX: &str = ".tmp-";

/// KV store using files on disk.
#[derive(Clone, Debug)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Creates a new `FsStore` with the specified directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn get_file_path(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(std::path::is_separator)
        {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl Store for FsStore {
    type Error = Error;

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error> {
        let path = self.get_file_path(&key.into())?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io("error deleting file", e)),
        }
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        let path = self.get_file_path(&key.into())?;
        match fs::read(path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("error reading file", e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, Self::Error> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io("error reading directory", e)),
        };
        let mut keys = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Io("error reading directory entry", e))?
        {
            match entry.file_name().to_str() {
                Some(key) if !key.starts_with('.') => keys.push(key.to_string()),
                Some(_) => {}
                None => warn!("Skipping non UTF-8 file name in {}", self.dir.display()),
            }
        }

        Ok(keys)
    }

    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error> {
        let path = self.get_file_path(&key.into())?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Io("error creating directory", e))?;

        let temp_path = self
            .dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Io("error creating file", e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::Io("error writing file", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Io("error syncing file", e))?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Io("error renaming file", e));
        }

        Ok(())
    }
}

/// A single-scoped KV store using the filesystem; each scope is a subdirectory.
#[derive(Clone, Debug)]
pub struct FsStore1 {
    dir: PathBuf,
}

impl FsStore1 {
    /// Creates a new `FsStore1` with the specified directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Store1 for FsStore1 {
    type Error = Error;
    type Scoped = FsStore;

    fn scope<S: Into<String> + Send>(&self, scope: S) -> FsStore {
        FsStore::new(self.dir.join(scope.into()))
    }
}
