//! Membership and leadership events emitted by the clustering layer

use serde::{Deserialize, Serialize};

use crate::{NodeId, PartitionId};

/// A single change observed by the clustering layer
///
/// Each event is folded into the current snapshot to produce the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyEvent {
    /// A broker joined the cluster (or changed its address)
    MemberAdded {
        /// The joining node
        node_id: NodeId,
        /// Address other brokers use to reach it
        address: String,
    },

    /// A broker left the cluster; it no longer leads or follows anything
    MemberRemoved {
        /// The departing node
        node_id: NodeId,
    },

    /// A node was elected leader of a partition
    LeadershipChanged {
        /// The new leader
        node_id: NodeId,
        /// The partition it now leads
        partition_id: PartitionId,
    },
}

impl TopologyEvent {
    /// The node this event is about
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::MemberAdded { node_id, .. }
            | Self::MemberRemoved { node_id }
            | Self::LeadershipChanged { node_id, .. } => *node_id,
        }
    }
}
