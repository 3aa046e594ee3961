//! Cluster topology for Meridian
//!
//! This crate provides:
//! - Node and partition identifiers (`NodeId`, `PartitionId`)
//! - Immutable topology snapshots rebuilt from membership events
//! - A lock-free read view (`TopologyView`) and its single writer (`TopologyManager`)

pub mod error;
pub mod event;
pub mod ids;
pub mod manager;
pub mod snapshot;
pub mod view;

pub use error::TopologyError;
pub use event::TopologyEvent;
pub use ids::{NodeId, PartitionId};
pub use manager::{TopologyManager, TopologySubscription};
pub use snapshot::{BrokerInfo, PartitionInfo, TopologySnapshot};
pub use view::{LeaderLookup, TopologyView};
