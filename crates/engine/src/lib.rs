//! Partitioned command engine with cross-partition distribution
//!
//! This crate provides:
//! - A per-partition actor that appends commands to a log and processes them
//! - A four-phase processing pipeline with pluggable record processors
//! - A coordinator that pushes commands to every other partition until each acknowledges
//! - A broker that runs the actors of the partitions its node leads

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::result_large_err)]

/// Node-level orchestration
pub mod broker;

/// Configuration types
pub mod config;

/// Cross-partition distribution
pub mod distribution;

/// Error types
pub mod error;

/// Partition actors and their handles
pub mod partition;

/// Record processing pipeline
pub mod pipeline;

/// Built-in record processors
pub mod processors;

/// Log records and keys
pub mod record;

pub use {
    broker::{Broker, BrokerBuilder},
    config::EngineConfig,
    distribution::{CompletionHandle, DistributionError, PushError, PushRequest},
    error::{EngineResult, Error, ErrorKind},
    partition::{ClientCommand, PartitionHandle, PartitionState},
    pipeline::{CommandResponse, ListenerEvent, ProcessingListener},
    processors::{Deployment, Topic},
    record::{Intent, Record, RecordType, Rejection, RejectionType, ValueType},
};
