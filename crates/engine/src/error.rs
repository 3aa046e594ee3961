//! Error types for the engine

use std::fmt;

use meridian_topology::{NodeId, PartitionId};
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, Error>;

/// Main error type for the engine
#[derive(Debug, Error)]
pub struct Error {
    /// Error kind
    kind: ErrorKind,
    /// Error context
    context: ErrorContext,
}

impl Error {
    /// Create a new error
    pub fn new(kind: ErrorKind, context: ErrorContext) -> Self {
        Self { kind, context }
    }

    /// Create error with string context
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::Message(context.into()),
        }
    }

    /// Create error wrapping a source error
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            context: ErrorContext::Chain {
                message: message.into(),
                source: Box::new(source),
            },
        }
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get error context
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::NotFound, what)
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::InvalidState, msg)
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Configuration, msg)
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Storage, msg)
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Serialization, msg)
    }

    /// Create a shutdown error
    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Shutdown, msg)
    }

    /// Create a not leader error
    pub fn not_leader(partition_id: PartitionId, current_leader: Option<NodeId>) -> Self {
        Self {
            kind: ErrorKind::NotLeader,
            context: ErrorContext::Leadership {
                partition_id,
                current_leader,
            },
        }
    }

    /// Check if this is a not-leader error
    pub fn is_not_leader(&self) -> bool {
        matches!(self.kind, ErrorKind::NotLeader)
    }

    /// Get the current leader from a not-leader error
    pub fn get_leader(&self) -> Option<NodeId> {
        match &self.context {
            ErrorContext::Leadership { current_leader, .. } => *current_leader,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            ErrorContext::Message(msg) => write!(f, "{}: {}", self.kind, msg),
            ErrorContext::Chain { message, source } => {
                write!(f, "{}: {} (caused by: {})", self.kind, message, source)
            }
            ErrorContext::Leadership {
                partition_id,
                current_leader,
            } => match current_leader {
                Some(leader) => write!(
                    f,
                    "{}: {} (current leader: {})",
                    self.kind, partition_id, leader
                ),
                None => write!(f, "{}: {} (no known leader)", self.kind, partition_id),
            },
        }
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Resource not found
    NotFound,
    /// Invalid state for operation
    InvalidState,
    /// Operation timed out
    Timeout,
    /// Network error
    Network,
    /// Storage error
    Storage,
    /// Configuration error
    Configuration,
    /// Encoding or decoding failed
    Serialization,
    /// Command could not be processed
    Processing,
    /// Cross-partition distribution failed
    Distribution,
    /// Internal error
    Internal,
    /// Not the leader
    NotLeader,
    /// Component shut down
    Shutdown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::InvalidState => write!(f, "Invalid state"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Network => write!(f, "Network error"),
            ErrorKind::Storage => write!(f, "Storage error"),
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::Serialization => write!(f, "Serialization error"),
            ErrorKind::Processing => write!(f, "Processing error"),
            ErrorKind::Distribution => write!(f, "Distribution error"),
            ErrorKind::Internal => write!(f, "Internal error"),
            ErrorKind::NotLeader => write!(f, "Not the leader"),
            ErrorKind::Shutdown => write!(f, "Shut down"),
        }
    }
}

/// Error context
#[derive(Debug)]
pub enum ErrorContext {
    /// Simple message
    Message(String),
    /// Error chain with source
    Chain {
        /// Error message
        message: String,
        /// Source error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Leadership error with info
    Leadership {
        /// Partition the request was aimed at
        partition_id: PartitionId,
        /// Current leader if known
        current_leader: Option<NodeId>,
    },
}

// Conversion implementations for lower-layer errors

impl From<meridian_storage::StorageError> for Error {
    fn from(err: meridian_storage::StorageError) -> Self {
        Self::with_source(ErrorKind::Storage, "Log storage error", err)
    }
}

impl From<meridian_network::NetworkError> for Error {
    fn from(err: meridian_network::NetworkError) -> Self {
        let kind = match err {
            meridian_network::NetworkError::Timeout(_) => ErrorKind::Timeout,
            meridian_network::NetworkError::Shutdown => ErrorKind::Shutdown,
            _ => ErrorKind::Network,
        };
        Self::with_source(kind, "Network error", err)
    }
}

impl From<meridian_topology::TopologyError> for Error {
    fn from(err: meridian_topology::TopologyError) -> Self {
        Self::with_source(ErrorKind::InvalidState, "Topology error", err)
    }
}

impl From<crate::distribution::DistributionError> for Error {
    fn from(err: crate::distribution::DistributionError) -> Self {
        Self::with_source(ErrorKind::Distribution, "Distribution failed", err)
    }
}

impl From<crate::pipeline::ProcessingError> for Error {
    fn from(err: crate::pipeline::ProcessingError) -> Self {
        Self::with_source(ErrorKind::Processing, "Processing failed", err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::with_source(ErrorKind::Internal, "Task join error", err)
    }
}

/// Helper macro for creating errors with context
#[macro_export]
macro_rules! engine_error {
    ($kind:expr, $($arg:tt)*) => {
        $crate::error::Error::with_context($kind, format!($($arg)*))
    };
}
