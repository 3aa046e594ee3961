//! Simple error types for topology operations

use thiserror::Error as ThisError;

use crate::{NodeId, PartitionId};

/// Topology-related errors
#[derive(Clone, Debug, ThisError)]
pub enum TopologyError {
    /// Leadership was assigned to a node that is not a cluster member
    #[error("Node {node_id} is not a member of the cluster")]
    UnknownNode {
        /// The node that was referenced
        node_id: NodeId,
    },

    /// A partition outside the configured partition set was referenced
    #[error("Partition {partition_id} is not part of the topology")]
    UnknownPartition {
        /// The partition that was referenced
        partition_id: PartitionId,
    },

    /// The change feed was closed by the clustering layer
    #[error("Topology change feed closed")]
    FeedClosed,

    /// Generic error
    #[error("{0}")]
    Other(String),
}
