//! Resources created on one partition and known on all of them

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::partition::PartitionState;
use crate::pipeline::ProcessingError;
use crate::record::{Record, ValueType, decode_value};

/// A resource that is distributed to every partition once created
pub trait DistributedResource:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    /// Value type of its records
    const VALUE_TYPE: ValueType;

    /// Name used in rejection reasons
    const KIND: &'static str;

    /// Unique name of the resource
    fn name(&self) -> &str;

    /// Check the value, returning the reason it is invalid
    fn validate(&self) -> Result<(), String>;

    /// Key of the resource registered as `name` in `state`, if any
    fn registered_key(state: &PartitionState, name: &str) -> Option<u64>;

    /// Register the resource under `key`; returns `false` if the name was taken
    fn register(self, key: u64, state: &mut PartitionState) -> bool;
}

/// Decode the resource carried by `command`
pub(crate) fn decode_resource<R: DistributedResource>(
    command: &Record,
) -> Result<R, ProcessingError> {
    decode_value(&command.payload).map_err(|e| ProcessingError::MalformedPayload {
        value_type: R::VALUE_TYPE,
        reason: e.to_string(),
    })
}

/// Register the resource carried by `command` under the command's key
///
/// A name that is already taken keeps its existing registration.
pub(crate) fn apply_resource<R: DistributedResource>(
    command: &Record,
    state: &mut PartitionState,
) -> Result<(), ProcessingError> {
    let resource: R = decode_resource(command)?;
    let name = resource.name().to_string();
    if !resource.register(command.key, state) {
        warn!(
            "{} '{}' is already registered, ignoring key {}",
            R::KIND,
            name,
            command.key
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::Topic;
    use crate::processors::testing::command;
    use crate::record::Intent;

    fn orders(partition_count: u32) -> Topic {
        Topic {
            name: "orders".to_string(),
            partition_count,
            replication_factor: 1,
        }
    }

    #[test]
    fn test_taken_name_keeps_first_registration() {
        let mut state = PartitionState::default();
        assert!(state.insert_topic(5, orders(1)));

        let taken = command(Intent::Distribute, ValueType::Topic, &orders(9));
        apply_resource::<Topic>(&taken, &mut state).unwrap();

        let registered = state.topic("orders").unwrap();
        assert_eq!(registered.key, 5);
        assert_eq!(registered.value.partition_count, 1);
        assert_eq!(Topic::registered_key(&state, "orders"), Some(5));
        assert_eq!(Topic::registered_key(&state, "payments"), None);
    }
}
