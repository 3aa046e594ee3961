//! Partition actors
//!
//! Every partition led by this node is owned by one task. It appends
//! commands to the partition's log, runs them through the processors and
//! drives the partition's distribution coordinator. Nothing else touches
//! the partition's state, so no locks are needed.

mod actor;
mod handle;
mod state;

pub(crate) use actor::{PartitionActor, PartitionParts};
pub use handle::{ClientCommand, PartitionHandle};
pub use state::{PartitionState, Registered};
