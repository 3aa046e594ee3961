//! Transport errors

use meridian_topology::NodeId;
use thiserror::Error;

/// Errors raised while moving envelopes between nodes
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The recipient is not reachable
    #[error("Failed to reach {node}: {reason}")]
    ConnectionFailed {
        /// Recipient node
        node: NodeId,
        /// Why the connection failed
        reason: String,
    },

    /// The transport was shut down
    #[error("Transport shut down")]
    Shutdown,

    /// Message exceeds the transport's size limit
    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the rejected message
        size: usize,
        /// Maximum accepted size
        limit: usize,
    },

    /// Other transport failure
    #[error("Transport error: {0}")]
    Other(String),
}
