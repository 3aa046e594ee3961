//! In-memory log storage implementation
//!
//! Clones share the same underlying logs, so several brokers handed the same
//! instance observe one log per partition. Tests use that to stand in for a
//! replicated log.

use async_trait::async_trait;
use bytes::Bytes;
use meridian_storage::{
    LogStorage, LogStorageStreaming, LogStream, StorageError, StorageNamespace, StorageResult,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::trace;

/// Number of entries read per lock acquisition while streaming
const STREAM_BATCH_SIZE: u64 = 256;

/// In-memory log storage using a BTreeMap per namespace
#[derive(Clone, Default)]
pub struct MemoryStorage {
    logs: Arc<RwLock<HashMap<StorageNamespace, BTreeMap<u64, Bytes>>>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage instance
    pub fn new() -> Self {
        Self::default()
    }
}

fn bounds_of(log: &BTreeMap<u64, Bytes>) -> Option<(u64, u64)> {
    let first = log.keys().next().copied()?;
    let last = log.keys().next_back().copied()?;
    Some((first, last))
}

#[async_trait]
impl LogStorage for MemoryStorage {
    async fn append(
        &self,
        namespace: &StorageNamespace,
        entries: Vec<(u64, Bytes)>,
    ) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut logs = self.logs.write().await;
        let log = logs.entry(namespace.clone()).or_default();

        let mut expected = bounds_of(log).map(|(_, last)| last + 1);
        for (index, _) in &entries {
            match expected {
                Some(expected) if *index != expected => {
                    return Err(StorageError::IndexConflict {
                        namespace: namespace.to_string(),
                        expected,
                        actual: *index,
                    });
                }
                _ => expected = Some(index + 1),
            }
        }

        trace!("Appending {} entries to {}", entries.len(), namespace);
        log.extend(entries);

        Ok(())
    }

    async fn bounds(&self, namespace: &StorageNamespace) -> StorageResult<Option<(u64, u64)>> {
        let logs = self.logs.read().await;
        Ok(logs.get(namespace).and_then(bounds_of))
    }

    async fn compact_before(&self, namespace: &StorageNamespace, index: u64) -> StorageResult<()> {
        let mut logs = self.logs.write().await;
        if let Some(log) = logs.get_mut(namespace) {
            *log = log.split_off(&index.saturating_add(1));
        }
        Ok(())
    }

    async fn read_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<(u64, Bytes)>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let logs = self.logs.read().await;
        Ok(logs
            .get(namespace)
            .map(|log| {
                log.range(start..end)
                    .map(|(&index, data)| (index, data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn truncate_after(&self, namespace: &StorageNamespace, index: u64) -> StorageResult<()> {
        let mut logs = self.logs.write().await;
        if let Some(log) = logs.get_mut(namespace) {
            log.split_off(&index.saturating_add(1));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStorageStreaming for MemoryStorage {
    async fn stream_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: Option<u64>,
    ) -> StorageResult<LogStream> {
        let storage = self.clone();
        let namespace = namespace.clone();

        let stream = async_stream::stream! {
            let mut next = start;
            loop {
                let upper = match end {
                    Some(end) => end.min(next.saturating_add(STREAM_BATCH_SIZE)),
                    None => next.saturating_add(STREAM_BATCH_SIZE),
                };
                if next >= upper {
                    break;
                }

                let batch = match storage.read_range(&namespace, next, upper).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                if batch.is_empty() {
                    break;
                }

                for (index, data) in batch {
                    next = index + 1;
                    yield Ok((index, data));
                }
            }
        };

        Ok(Box::new(Box::pin(stream)))
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("logs", &"<locked>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn entries(range: std::ops::RangeInclusive<u64>) -> Vec<(u64, Bytes)> {
        range
            .map(|i| (i, Bytes::from(format!("record {i}"))))
            .collect()
    }

    #[tokio::test]
    async fn test_append_and_read_range() {
        let storage = MemoryStorage::new();
        let namespace = StorageNamespace::new("partition-1");

        storage.append(&namespace, entries(1..=3)).await.unwrap();

        let range = storage.read_range(&namespace, 1, 4).await.unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0], (1, Bytes::from("record 1")));
        assert_eq!(range[2], (3, Bytes::from("record 3")));
        assert_eq!(storage.bounds(&namespace).await.unwrap(), Some((1, 3)));
    }

    #[tokio::test]
    async fn test_append_rejects_gaps_and_overwrites() {
        let storage = MemoryStorage::new();
        let namespace = StorageNamespace::new("partition-1");

        storage.append(&namespace, entries(1..=2)).await.unwrap();

        let gap = storage.append(&namespace, entries(4..=4)).await;
        assert!(matches!(
            gap,
            Err(StorageError::IndexConflict {
                expected: 3,
                actual: 4,
                ..
            })
        ));

        let overwrite = storage.append(&namespace, entries(2..=3)).await;
        assert!(matches!(overwrite, Err(StorageError::IndexConflict { .. })));

        // Nothing from the rejected batches was written
        assert_eq!(storage.bounds(&namespace).await.unwrap(), Some((1, 2)));
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let storage = MemoryStorage::new();
        let first = StorageNamespace::new("partition-1");
        let second = StorageNamespace::new("partition-2");

        storage.append(&first, entries(1..=5)).await.unwrap();
        storage.append(&second, entries(1..=1)).await.unwrap();

        assert_eq!(storage.bounds(&first).await.unwrap(), Some((1, 5)));
        assert_eq!(storage.bounds(&second).await.unwrap(), Some((1, 1)));
        assert_eq!(
            storage
                .bounds(&StorageNamespace::new("partition-3"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_truncate_and_compact() {
        let storage = MemoryStorage::new();
        let namespace = StorageNamespace::new("partition-1");

        storage.append(&namespace, entries(1..=5)).await.unwrap();
        storage.truncate_after(&namespace, 3).await.unwrap();
        assert_eq!(storage.bounds(&namespace).await.unwrap(), Some((1, 3)));

        storage.compact_before(&namespace, 1).await.unwrap();
        assert_eq!(storage.bounds(&namespace).await.unwrap(), Some((2, 3)));

        // Appending continues after the truncated tail
        storage.append(&namespace, entries(4..=4)).await.unwrap();
        assert_eq!(storage.bounds(&namespace).await.unwrap(), Some((2, 4)));
    }

    #[tokio::test]
    async fn test_stream_range_crosses_batches() {
        let storage = MemoryStorage::new();
        let namespace = StorageNamespace::new("partition-1");
        let count = STREAM_BATCH_SIZE * 2 + 10;

        storage.append(&namespace, entries(1..=count)).await.unwrap();

        let mut stream = storage.stream_range(&namespace, 1, None).await.unwrap();
        let mut seen = 0;
        while let Some(entry) = stream.next().await {
            let (index, _) = entry.unwrap();
            seen += 1;
            assert_eq!(index, seen);
        }
        assert_eq!(seen, count);

        let bounded: Vec<_> = storage
            .stream_range(&namespace, 10, Some(20))
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;
        assert_eq!(bounded.len(), 10);
    }
}
