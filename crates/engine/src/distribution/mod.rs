//! Reliable distribution of commands from one partition to all others

mod completion;
mod coordinator;
mod messages;
mod sender;
mod store;

pub use completion::{CompletionHandle, DistributionResult};
pub use coordinator::{CoordinatorEvent, DistributionCoordinator, DistributionProgress};
pub use messages::{PushError, PushReply, PushRequest, PushResponse, PushResult};
pub use sender::{NetworkPushSender, PushFailure, PushSender};
pub use store::{PendingDistribution, PendingDistributionStore};

use async_trait::async_trait;
use bytes::Bytes;
use meridian_topology::PartitionId;
use thiserror::Error;

/// Why a distribution did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    /// Discarded before every target acknowledged
    #[error("distribution {key} was abandoned")]
    Abandoned {
        /// Distribution key
        key: u64,
    },

    /// A target refused the payload for a reason other than duplication
    #[error("{partition_id} rejected distribution {key}: {reason}")]
    Rejected {
        /// Distribution key
        key: u64,
        /// Refusing partition
        partition_id: PartitionId,
        /// Reason given by the target
        reason: String,
    },

    /// The key is in flight with a different payload
    #[error("distribution {key} is already in flight with a different payload")]
    DuplicateKey {
        /// Distribution key
        key: u64,
    },

    /// The payload to distribute could not be encoded
    #[error("failed to encode distribution {key}: {reason}")]
    Encode {
        /// Distribution key
        key: u64,
        /// Underlying encoding failure
        reason: String,
    },

    /// The pending entry could not be persisted
    #[error("failed to persist distribution {key}: {reason}")]
    Store {
        /// Distribution key
        key: u64,
        /// Underlying store failure
        reason: String,
    },

    /// The coordinator stopped before the distribution completed
    #[error("coordinator shut down before distribution {key} completed")]
    Shutdown {
        /// Distribution key
        key: u64,
    },
}

impl DistributionError {
    /// Whether starting the same distribution again may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

/// Starts distributions on behalf of record processors
#[async_trait]
pub trait Distributor: Send {
    /// Persist and start fanning out `payload` to every other partition
    ///
    /// Distributing a key that is already in flight with the same payload
    /// returns another handle onto the running distribution.
    async fn distribute(
        &mut self,
        distribution_key: u64,
        source_position: u64,
        payload: Bytes,
    ) -> Result<CompletionHandle, DistributionError>;
}
