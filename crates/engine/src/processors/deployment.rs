use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::DistributedResource;
use crate::partition::PartitionState;
use crate::record::ValueType;

/// A deployed resource, such as a process definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Name the resource is deployed under
    pub resource_name: String,
    /// Resource content, opaque to the engine
    pub resource: Bytes,
}

impl DistributedResource for Deployment {
    const VALUE_TYPE: ValueType = ValueType::Deployment;
    const KIND: &'static str = "deployment";

    fn name(&self) -> &str {
        &self.resource_name
    }

    fn validate(&self) -> Result<(), String> {
        if self.resource_name.trim().is_empty() {
            return Err("the resource name must not be empty".to_string());
        }
        if self.resource.is_empty() {
            return Err(format!("resource '{}' is empty", self.resource_name));
        }
        Ok(())
    }

    fn registered_key(state: &PartitionState, name: &str) -> Option<u64> {
        state.deployment(name).map(|registered| registered.key)
    }

    fn register(self, key: u64, state: &mut PartitionState) -> bool {
        state.insert_deployment(key, self)
    }
}
