use serde::{Deserialize, Serialize};

use super::DistributedResource;
use crate::partition::PartitionState;
use crate::record::ValueType;

/// A topic with a fixed number of partitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name
    pub name: String,
    /// Number of partitions, at least 1
    pub partition_count: u32,
    /// Number of replicas per partition, at least 1
    pub replication_factor: u32,
}

impl DistributedResource for Topic {
    const VALUE_TYPE: ValueType = ValueType::Topic;
    const KIND: &'static str = "topic";

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("the name must not be empty".to_string());
        }
        if self.partition_count < 1 {
            return Err(format!(
                "the partition count must be at least 1, but was {}",
                self.partition_count
            ));
        }
        if self.replication_factor < 1 {
            return Err(format!(
                "the replication factor must be at least 1, but was {}",
                self.replication_factor
            ));
        }
        Ok(())
    }

    fn registered_key(state: &PartitionState, name: &str) -> Option<u64> {
        state.topic(name).map(|registered| registered.key)
    }

    fn register(self, key: u64, state: &mut PartitionState) -> bool {
        state.insert_topic(key, self)
    }
}
