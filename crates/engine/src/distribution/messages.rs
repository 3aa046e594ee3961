//! Push messages exchanged between a coordinator and target partition leaders

use bytes::Bytes;
use meridian_network::{NetworkMessage, ServiceMessage};
use meridian_topology::{NodeId, PartitionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deliver a distributed command to a target partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Distribution being delivered
    pub distribution_key: u64,
    /// Target partition
    pub partition_id: PartitionId,
    /// Distributed command
    pub payload: Bytes,
}

/// Acknowledgement that the target applied (or had already applied) the command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Distribution acknowledged
    pub distribution_key: u64,
    /// Acknowledging partition
    pub partition_id: PartitionId,
}

/// Failure reported by the node that received a push
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PushError {
    /// The receiving node does not lead the partition
    #[error("not the leader of {partition_id}")]
    NotLeader {
        /// Target partition
        partition_id: PartitionId,
        /// Leader known to the receiving node
        leader: Option<NodeId>,
    },

    /// The partition is led here but cannot take commands right now
    #[error("{partition_id} is unavailable")]
    PartitionUnavailable {
        /// Target partition
        partition_id: PartitionId,
    },

    /// The partition refused the command; retrying cannot help
    #[error("{partition_id} rejected the command: {reason}")]
    Rejected {
        /// Target partition
        partition_id: PartitionId,
        /// Reason given by the partition
        reason: String,
    },
}

impl PushError {
    /// Whether the push should be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Outcome of a push on the receiving partition
pub type PushResult = Result<PushResponse, PushError>;

/// Wire form of [`PushResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushReply {
    /// Applied or already applied
    Acknowledged(PushResponse),
    /// Not applied
    Failed(PushError),
}

impl From<PushResult> for PushReply {
    fn from(result: PushResult) -> Self {
        match result {
            Ok(response) => Self::Acknowledged(response),
            Err(error) => Self::Failed(error),
        }
    }
}

impl From<PushReply> for PushResult {
    fn from(reply: PushReply) -> Self {
        match reply {
            PushReply::Acknowledged(response) => Ok(response),
            PushReply::Failed(error) => Err(error),
        }
    }
}

impl NetworkMessage for PushRequest {
    fn message_type() -> &'static str {
        "distribution.push"
    }
}

impl NetworkMessage for PushReply {
    fn message_type() -> &'static str {
        "distribution.push_reply"
    }
}

impl ServiceMessage for PushRequest {
    type Response = PushReply;
}
