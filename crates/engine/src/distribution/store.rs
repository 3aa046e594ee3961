//! Durable record of distributions that have not completed yet
//!
//! Each entry is stored under its distribution key (decimal) with the layout
//!
//! ```text
//! offset 0  : source position (u64, little endian)
//! offset 8  : payload length  (u32, little endian)
//! offset 12 : payload         (payload length bytes)
//! ```
//!
//! The number of remaining targets is not stored; it depends on the topology
//! and is recomputed whenever a distribution is (re)started.

use bytes::{BufMut, Bytes, BytesMut};
use meridian_store::Store;
use tracing::warn;

use crate::error::{EngineResult, Error, ErrorKind};

const HEADER_LEN: usize = 12;

/// A distribution whose payload has not reached every target yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDistribution {
    /// Key identifying the distribution, usually the originating command's key
    pub distribution_key: u64,
    /// Log position of the command that started the distribution
    pub source_position: u64,
    /// Command payload pushed to every target
    pub payload: Bytes,
}

impl PendingDistribution {
    /// Encode the value part of the entry
    pub fn encode(&self) -> EngineResult<Bytes> {
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| {
            Error::with_context(
                ErrorKind::Serialization,
                format!(
                    "payload of distribution {} is too large ({} bytes)",
                    self.distribution_key,
                    self.payload.len()
                ),
            )
        })?;

        let mut buffer = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buffer.put_u64_le(self.source_position);
        buffer.put_u32_le(payload_len);
        buffer.put_slice(&self.payload);
        Ok(buffer.freeze())
    }

    /// Decode the value stored for `distribution_key`
    pub fn decode(distribution_key: u64, bytes: &[u8]) -> EngineResult<Self> {
        let Some((header, payload)) = bytes.split_at_checked(HEADER_LEN) else {
            return Err(Error::with_context(
                ErrorKind::Serialization,
                format!(
                    "pending distribution {distribution_key} truncated: {} bytes",
                    bytes.len()
                ),
            ));
        };

        let mut position = [0u8; 8];
        position.copy_from_slice(&header[..8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&header[8..]);

        let source_position = u64::from_le_bytes(position);
        let payload_len = u32::from_le_bytes(length) as usize;

        if payload.len() != payload_len {
            return Err(Error::with_context(
                ErrorKind::Serialization,
                format!(
                    "pending distribution {distribution_key} declares {payload_len} payload bytes but has {}",
                    payload.len()
                ),
            ));
        }

        Ok(Self {
            distribution_key,
            source_position,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

/// Partition-local store of pending distributions
#[derive(Debug, Clone)]
pub struct PendingDistributionStore<S: Store> {
    store: S,
}

impl<S: Store> PendingDistributionStore<S> {
    /// Wrap a store already scoped to one partition
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persist a new pending distribution
    pub async fn put(
        &self,
        distribution_key: u64,
        payload: Bytes,
        source_position: u64,
    ) -> EngineResult<PendingDistribution> {
        let entry = PendingDistribution {
            distribution_key,
            source_position,
            payload,
        };

        self.store
            .put(distribution_key.to_string(), entry.encode()?)
            .await
            .map_err(|e| Error::with_source(ErrorKind::Storage, "failed to persist distribution", e))?;

        Ok(entry)
    }

    /// Load a pending distribution
    pub async fn get(&self, distribution_key: u64) -> EngineResult<Option<PendingDistribution>> {
        let bytes = self
            .store
            .get(distribution_key.to_string())
            .await
            .map_err(|e| Error::with_source(ErrorKind::Storage, "failed to load distribution", e))?;

        bytes
            .map(|bytes| PendingDistribution::decode(distribution_key, &bytes))
            .transpose()
    }

    /// Remove a pending distribution; removing a missing entry is not an error
    pub async fn remove(&self, distribution_key: u64) -> EngineResult<()> {
        self.store
            .del(distribution_key.to_string())
            .await
            .map_err(|e| Error::with_source(ErrorKind::Storage, "failed to remove distribution", e))
    }

    /// Keys of every pending distribution, in ascending order
    pub async fn keys(&self) -> EngineResult<Vec<u64>> {
        let keys = self
            .store
            .keys()
            .await
            .map_err(|e| Error::with_source(ErrorKind::Storage, "failed to list distributions", e))?;

        let mut parsed: Vec<u64> = keys
            .into_iter()
            .filter_map(|key| match key.parse() {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!("Ignoring unexpected key '{}' in distribution store", key);
                    None
                }
            })
            .collect();
        parsed.sort_unstable();

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_store::Store1;
    use meridian_store_fs::FsStore1;
    use meridian_store_memory::MemoryStore;

    #[test]
    fn test_binary_layout() {
        let entry = PendingDistribution {
            distribution_key: 42,
            source_position: 0x0102_0304_0506_0708,
            payload: Bytes::from_static(b"abc"),
        };

        let bytes = entry.encode().unwrap();

        assert_eq!(
            bytes.as_ref(),
            &[
                0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // source position
                0x03, 0x00, 0x00, 0x00, // payload length
                b'a', b'b', b'c',
            ]
        );
        assert_eq!(PendingDistribution::decode(42, &bytes).unwrap(), entry);
    }

    #[test]
    fn test_empty_payload() {
        let entry = PendingDistribution {
            distribution_key: 1,
            source_position: 7,
            payload: Bytes::new(),
        };

        let bytes = entry.encode().unwrap();

        assert_eq!(bytes.len(), 12);
        assert_eq!(PendingDistribution::decode(1, &bytes).unwrap(), entry);
    }

    #[test]
    fn test_decode_rejects_truncated_and_mismatched_values() {
        let entry = PendingDistribution {
            distribution_key: 1,
            source_position: 7,
            payload: Bytes::from_static(b"payload"),
        };
        let bytes = entry.encode().unwrap();

        assert!(PendingDistribution::decode(1, &bytes[..11]).is_err());
        assert!(PendingDistribution::decode(1, &bytes[..bytes.len() - 1]).is_err());

        let mut longer = bytes.to_vec();
        longer.push(0);
        assert!(PendingDistribution::decode(1, &longer).is_err());
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = PendingDistributionStore::new(MemoryStore::new());

        store
            .put(42, Bytes::from_static(b"payload"), 3)
            .await
            .unwrap();
        store.put(7, Bytes::from_static(b"other"), 1).await.unwrap();

        let entry = store.get(42).await.unwrap().unwrap();
        assert_eq!(entry.source_position, 3);
        assert_eq!(entry.payload, Bytes::from_static(b"payload"));
        assert_eq!(store.keys().await.unwrap(), vec![7, 42]);

        store.remove(42).await.unwrap();
        store.remove(42).await.unwrap();

        assert_eq!(store.get(42).await.unwrap(), None);
        assert_eq!(store.keys().await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_entries_survive_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();

        let store = PendingDistributionStore::new(FsStore1::new(dir.path()).scope("partition-1"));
        store.put(99, Bytes::from_static(b"durable"), 12).await.unwrap();
        drop(store);

        let reopened =
            PendingDistributionStore::new(FsStore1::new(dir.path()).scope("partition-1"));
        let entry = reopened.get(99).await.unwrap().unwrap();

        assert_eq!(entry.source_position, 12);
        assert_eq!(entry.payload, Bytes::from_static(b"durable"));
    }
}
