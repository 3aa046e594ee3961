//! Read-only access to the current topology snapshot

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

use crate::{NodeId, PartitionId, TopologySnapshot};

/// Leader lookup consumed by components that route requests to partitions
///
/// Implementations must answer from a consistent snapshot; callers re-query
/// on every attempt instead of caching the answer.
pub trait LeaderLookup: Send + Sync + 'static {
    /// Node currently leading `partition_id`, if known
    fn current_leader(&self, partition_id: PartitionId) -> Option<NodeId>;

    /// Every partition of the cluster
    fn partition_ids(&self) -> Vec<PartitionId>;
}

/// Cheap, cloneable handle onto the latest published snapshot
///
/// Readers never lock: each call loads the snapshot pointer atomically.
#[derive(Clone)]
pub struct TopologyView {
    current: Arc<ArcSwap<TopologySnapshot>>,
}

impl TopologyView {
    pub(crate) fn new(current: Arc<ArcSwap<TopologySnapshot>>) -> Self {
        Self { current }
    }

    /// Create a view over a fixed snapshot that never changes
    pub fn fixed(snapshot: TopologySnapshot) -> Self {
        Self::new(Arc::new(ArcSwap::from_pointee(snapshot)))
    }

    /// The latest snapshot
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.load_full()
    }

    /// Version of the latest snapshot
    pub fn version(&self) -> u64 {
        self.current.load().version()
    }
}

impl LeaderLookup for TopologyView {
    fn current_leader(&self, partition_id: PartitionId) -> Option<NodeId> {
        self.current.load().leader(partition_id)
    }

    fn partition_ids(&self) -> Vec<PartitionId> {
        self.current.load().partition_ids()
    }
}

impl fmt::Debug for TopologyView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyView")
            .field("version", &self.version())
            .finish()
    }
}
