//! Resources registered on a partition

use std::collections::BTreeMap;

use crate::processors::{Deployment, Topic};

/// A resource and the key of the command that created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered<T> {
    /// Key of the creating command
    pub key: u64,
    /// The resource
    pub value: T,
}

/// State mutated by record processors, owned by the partition actor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionState {
    topics: BTreeMap<String, Registered<Topic>>,
    deployments: BTreeMap<String, Registered<Deployment>>,
}

impl PartitionState {
    /// Topic registered under `name`
    pub fn topic(&self, name: &str) -> Option<&Registered<Topic>> {
        self.topics.get(name)
    }

    /// Every topic, ordered by name
    pub fn topics(&self) -> impl Iterator<Item = &Registered<Topic>> {
        self.topics.values()
    }

    /// Register a topic; returns `false` if the name was taken
    pub fn insert_topic(&mut self, key: u64, topic: Topic) -> bool {
        insert(&mut self.topics, topic.name.clone(), key, topic)
    }

    /// Deployment registered under `resource_name`
    pub fn deployment(&self, resource_name: &str) -> Option<&Registered<Deployment>> {
        self.deployments.get(resource_name)
    }

    /// Every deployment, ordered by resource name
    pub fn deployments(&self) -> impl Iterator<Item = &Registered<Deployment>> {
        self.deployments.values()
    }

    /// Register a deployment; returns `false` if the name was taken
    pub fn insert_deployment(&mut self, key: u64, deployment: Deployment) -> bool {
        insert(
            &mut self.deployments,
            deployment.resource_name.clone(),
            key,
            deployment,
        )
    }
}

fn insert<T>(map: &mut BTreeMap<String, Registered<T>>, name: String, key: u64, value: T) -> bool {
    if map.contains_key(&name) {
        return false;
    }
    map.insert(name, Registered { key, value });
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registration_wins() {
        let mut state = PartitionState::default();
        let topic = |partition_count| Topic {
            name: "orders".to_string(),
            partition_count,
            replication_factor: 1,
        };

        assert!(state.insert_topic(1, topic(3)));
        assert!(!state.insert_topic(2, topic(5)));

        let registered = state.topic("orders").unwrap();
        assert_eq!(registered.key, 1);
        assert_eq!(registered.value.partition_count, 3);
        assert_eq!(state.topics().count(), 1);
        assert!(state.deployment("orders").is_none());
    }
}
