//! Records stored in a partition's log

mod key;

pub use key::{
    KEY_BITS, KeyGenerator, MAX_PARTITION_ID, PARTITION_BITS, decode_local_key,
    decode_partition_id, encode_key,
};

use bytes::Bytes;
use meridian_topology::PartitionId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineResult, Error, ErrorKind};

/// Whether a record asks for a change, reports one, or refuses one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// Request to change state
    Command,
    /// Accepted change
    Event,
    /// Refused command
    CommandRejection,
}

/// Kind of entity a record is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Topic definition
    Topic,
    /// Deployed resource
    Deployment,
}

/// What a record does to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Intent {
    /// Create on the originating partition
    Create,
    /// Created on the originating partition
    Created,
    /// Apply a distributed creation on a target partition
    Distribute,
    /// Distributed creation applied on a target partition
    Distributed,
}

/// Why a command was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionType {
    /// The command's value failed validation
    InvalidArgument,
    /// The entity already exists
    AlreadyExists,
    /// The command conflicts with the entity's current state
    InvalidState,
    /// The command could not be processed at all
    ProcessingError,
}

/// A refused command's reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Category of the refusal
    pub rejection_type: RejectionType,
    /// Human readable reason
    pub reason: String,
}

impl Rejection {
    /// Create a rejection
    pub fn new(rejection_type: RejectionType, reason: impl Into<String>) -> Self {
        Self {
            rejection_type,
            reason: reason.into(),
        }
    }

    /// Value failed validation
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidArgument, reason)
    }

    /// Entity already exists
    pub fn already_exists(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::AlreadyExists, reason)
    }

    /// Command conflicts with existing state
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidState, reason)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.rejection_type, self.reason)
    }
}

/// An entry of a partition's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Entity key, partition-encoded
    pub key: u64,
    /// Partition whose log holds the record
    pub partition_id: PartitionId,
    /// Position in the log, assigned on append
    pub position: u64,
    /// Command, event or rejection
    pub record_type: RecordType,
    /// Entity kind
    pub value_type: ValueType,
    /// What happens to the entity
    pub intent: Intent,
    /// Set on command rejections
    pub rejection: Option<Rejection>,
    /// Position of the command this record follows up, if any
    pub source_record_position: Option<u64>,
    /// Value, CBOR encoded
    pub payload: Bytes,
}

impl Record {
    /// Build a command record; key and position are assigned by the partition
    pub fn command(
        partition_id: PartitionId,
        value_type: ValueType,
        intent: Intent,
        payload: Bytes,
    ) -> Self {
        Self {
            key: 0,
            partition_id,
            position: 0,
            record_type: RecordType::Command,
            value_type,
            intent,
            rejection: None,
            source_record_position: None,
            payload,
        }
    }

    /// Whether this record is a command
    pub fn is_command(&self) -> bool {
        self.record_type == RecordType::Command
    }

    /// Encode for the log
    pub fn encode(&self) -> EngineResult<Bytes> {
        encode_value(self)
    }

    /// Decode from the log
    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        decode_value(bytes)
    }
}

/// A command carried from its originating partition to a target partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedCommand {
    /// Entity kind
    pub value_type: ValueType,
    /// Intent the command has on the target
    pub intent: Intent,
    /// Value, CBOR encoded
    pub value: Bytes,
}

impl DistributedCommand {
    /// Encode as a push payload
    pub fn encode(&self) -> EngineResult<Bytes> {
        encode_value(self)
    }

    /// Decode a push payload
    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        decode_value(bytes)
    }

    /// The command record appended on `partition_id`, keyed by the distribution
    pub fn into_command(self, partition_id: PartitionId, distribution_key: u64) -> Record {
        let mut command = Record::command(partition_id, self.value_type, self.intent, self.value);
        command.key = distribution_key;
        command
    }
}

/// Encode a value with CBOR
pub fn encode_value<T: Serialize>(value: &T) -> EngineResult<Bytes> {
    let mut buffer = Vec::new();
    ciborium::into_writer(value, &mut buffer)
        .map_err(|e| Error::with_source(ErrorKind::Serialization, "CBOR encoding failed", e))?;
    Ok(Bytes::from(buffer))
}

/// Decode a CBOR value
pub fn decode_value<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| Error::with_source(ErrorKind::Serialization, "CBOR decoding failed", e))
}
