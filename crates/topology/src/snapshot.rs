//! Immutable topology snapshots

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{NodeId, PartitionId, TopologyError, TopologyEvent};

/// Leadership information for a single partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Current leader, if one is known
    pub leader: Option<NodeId>,
    /// Nodes known to replicate this partition without leading it
    pub followers: BTreeSet<NodeId>,
}

/// A broker that is a member of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    /// Broker node ID
    pub node_id: NodeId,
    /// Address the broker can be reached at
    pub address: String,
}

/// Point-in-time view of partition leadership and broker membership
///
/// Snapshots are never mutated once published; `apply` builds the successor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    version: u64,
    partitions: BTreeMap<PartitionId, PartitionInfo>,
    brokers: BTreeMap<NodeId, BrokerInfo>,
}

impl TopologySnapshot {
    /// Create an empty snapshot for the given partition set (no leaders, no brokers)
    pub fn new(partitions: impl IntoIterator<Item = PartitionId>) -> Self {
        Self {
            version: 0,
            partitions: partitions
                .into_iter()
                .map(|id| (id, PartitionInfo::default()))
                .collect(),
            brokers: BTreeMap::new(),
        }
    }

    /// Create a snapshot for partitions `1..=count`
    pub fn with_partition_count(count: u32) -> Self {
        Self::new((1..=count).map(PartitionId::new))
    }

    /// Monotonic version, incremented for every applied event
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current leader of a partition
    pub fn leader(&self, partition_id: PartitionId) -> Option<NodeId> {
        self.partitions
            .get(&partition_id)
            .and_then(|info| info.leader)
    }

    /// Leadership information of a partition
    pub fn partition(&self, partition_id: PartitionId) -> Option<&PartitionInfo> {
        self.partitions.get(&partition_id)
    }

    /// All partitions known to this snapshot, in ascending order
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    /// Partitions currently led by the given node
    pub fn partitions_led_by(&self, node_id: NodeId) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|(_, info)| info.leader == Some(node_id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Broker information for a node
    pub fn broker(&self, node_id: NodeId) -> Option<&BrokerInfo> {
        self.brokers.get(&node_id)
    }

    /// All cluster members
    pub fn brokers(&self) -> impl Iterator<Item = &BrokerInfo> {
        self.brokers.values()
    }

    /// Build the successor snapshot produced by `event`
    pub fn apply(&self, event: &TopologyEvent) -> Result<Self, TopologyError> {
        let mut next = self.clone();
        next.version += 1;

        match event {
            TopologyEvent::MemberAdded { node_id, address } => {
                next.brokers.insert(
                    *node_id,
                    BrokerInfo {
                        node_id: *node_id,
                        address: address.clone(),
                    },
                );
            }
            TopologyEvent::MemberRemoved { node_id } => {
                next.brokers.remove(node_id);
                for info in next.partitions.values_mut() {
                    if info.leader == Some(*node_id) {
                        info.leader = None;
                    }
                    info.followers.remove(node_id);
                }
            }
            TopologyEvent::LeadershipChanged {
                node_id,
                partition_id,
            } => {
                if !next.brokers.contains_key(node_id) {
                    return Err(TopologyError::UnknownNode { node_id: *node_id });
                }
                let info = next.partitions.get_mut(partition_id).ok_or(
                    TopologyError::UnknownPartition {
                        partition_id: *partition_id,
                    },
                )?;
                match info.leader.replace(*node_id) {
                    Some(previous) if previous != *node_id => {
                        info.followers.insert(previous);
                    }
                    _ => {}
                }
                info.followers.remove(node_id);
            }
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u32) -> TopologyEvent {
        TopologyEvent::MemberAdded {
            node_id: NodeId::new(id),
            address: format!("127.0.0.1:{}", 26500 + id),
        }
    }

    fn leader(node: u32, partition: u32) -> TopologyEvent {
        TopologyEvent::LeadershipChanged {
            node_id: NodeId::new(node),
            partition_id: PartitionId::new(partition),
        }
    }

    #[test]
    fn test_leadership_change_demotes_previous_leader() {
        let snapshot = TopologySnapshot::with_partition_count(2)
            .apply(&member(1))
            .and_then(|s| s.apply(&member(2)))
            .and_then(|s| s.apply(&leader(1, 1)))
            .and_then(|s| s.apply(&leader(2, 1)))
            .unwrap();

        let info = snapshot.partition(PartitionId::new(1)).unwrap();
        assert_eq!(info.leader, Some(NodeId::new(2)));
        assert!(info.followers.contains(&NodeId::new(1)));
        assert_eq!(snapshot.version(), 4);
    }

    #[test]
    fn test_member_removal_clears_leadership() {
        let snapshot = TopologySnapshot::with_partition_count(2)
            .apply(&member(1))
            .and_then(|s| s.apply(&leader(1, 1)))
            .and_then(|s| s.apply(&leader(1, 2)))
            .and_then(|s| s.apply(&TopologyEvent::MemberRemoved { node_id: NodeId::new(1) }))
            .unwrap();

        assert_eq!(snapshot.leader(PartitionId::new(1)), None);
        assert_eq!(snapshot.leader(PartitionId::new(2)), None);
        assert!(snapshot.broker(NodeId::new(1)).is_none());
    }

    #[test]
    fn test_apply_leaves_original_untouched() {
        let original = TopologySnapshot::with_partition_count(1)
            .apply(&member(1))
            .unwrap();
        let next = original.apply(&leader(1, 1)).unwrap();

        assert_eq!(original.leader(PartitionId::new(1)), None);
        assert_eq!(next.leader(PartitionId::new(1)), Some(NodeId::new(1)));
    }

    #[test]
    fn test_leadership_for_unknown_node_or_partition_is_rejected() {
        let snapshot = TopologySnapshot::with_partition_count(1)
            .apply(&member(1))
            .unwrap();

        assert!(matches!(
            snapshot.apply(&leader(9, 1)),
            Err(TopologyError::UnknownNode { .. })
        ));
        assert!(matches!(
            snapshot.apply(&leader(1, 7)),
            Err(TopologyError::UnknownPartition { .. })
        ));
    }
}
