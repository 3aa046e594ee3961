//! Partition-encoded record keys
//!
//! A key is a `u64` whose top 13 bits hold the partition that generated it and
//! whose low 51 bits hold a counter local to that partition. Keys from
//! different partitions can never collide.

use meridian_topology::PartitionId;

/// Bits reserved for the partition id
pub const PARTITION_BITS: u32 = 13;

/// Bits reserved for the partition-local counter
pub const KEY_BITS: u32 = u64::BITS - PARTITION_BITS;

/// Largest partition id that fits in a key
pub const MAX_PARTITION_ID: u32 = (1 << PARTITION_BITS) - 1;

const KEY_MASK: u64 = (1 << KEY_BITS) - 1;

/// Combine a partition id and a local counter into a key
pub fn encode_key(partition_id: PartitionId, local_key: u64) -> u64 {
    debug_assert!(partition_id.value() <= MAX_PARTITION_ID);
    (u64::from(partition_id.value()) << KEY_BITS) | (local_key & KEY_MASK)
}

/// Partition that generated `key`
pub fn decode_partition_id(key: u64) -> PartitionId {
    // The shifted value has at most PARTITION_BITS bits
    PartitionId::new((key >> KEY_BITS) as u32)
}

/// Partition-local counter part of `key`
pub fn decode_local_key(key: u64) -> u64 {
    key & KEY_MASK
}

/// Hands out strictly increasing keys for one partition
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    partition_id: PartitionId,
    last_local_key: u64,
}

impl KeyGenerator {
    /// Create a generator that has not issued any key yet
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            last_local_key: 0,
        }
    }

    /// Issue the next key
    pub fn next_key(&mut self) -> u64 {
        self.last_local_key += 1;
        encode_key(self.partition_id, self.last_local_key)
    }

    /// Account for a key found in the log
    ///
    /// Keys generated by other partitions are ignored.
    pub fn observe(&mut self, key: u64) {
        if decode_partition_id(key) == self.partition_id {
            self.last_local_key = self.last_local_key.max(decode_local_key(key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_embeds_partition_id() {
        let key = encode_key(PartitionId::new(3), 42);

        assert_eq!(decode_partition_id(key), PartitionId::new(3));
        assert_eq!(decode_local_key(key), 42);
        assert_eq!(key >> 51, 3);
    }

    #[test]
    fn test_keys_from_different_partitions_do_not_collide() {
        let a = encode_key(PartitionId::new(1), 7);
        let b = encode_key(PartitionId::new(2), 7);

        assert_ne!(a, b);
    }

    #[test]
    fn test_largest_partition_and_counter() {
        let key = encode_key(PartitionId::new(MAX_PARTITION_ID), KEY_MASK);

        assert_eq!(key, u64::MAX);
        assert_eq!(decode_partition_id(key).value(), MAX_PARTITION_ID);
    }

    #[test]
    fn test_generator_restores_from_observed_keys() {
        let partition = PartitionId::new(2);
        let mut generator = KeyGenerator::new(partition);

        generator.observe(encode_key(partition, 10));
        generator.observe(encode_key(partition, 4));
        generator.observe(encode_key(PartitionId::new(5), 99));

        assert_eq!(generator.next_key(), encode_key(partition, 11));
        assert_eq!(generator.next_key(), encode_key(partition, 12));
    }
}
