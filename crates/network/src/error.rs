//! Error types for the network layer

use meridian_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Network operation errors
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Handler already registered
    #[error("Handler already registered for message type '{message_type}'")]
    HandlerAlreadyRegistered {
        /// Message type that was registered twice
        message_type: String,
    },

    /// The remote node has no handler for the request
    #[error("No handler registered for message type '{message_type}'")]
    NoHandler {
        /// Message type without a handler
        message_type: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The remote service failed while handling the request
    #[error("Service error: {0}")]
    ServiceError(String),

    /// The network manager was shut down
    #[error("Network manager shut down")]
    Shutdown,
}

/// Result type alias
pub type NetworkResult<T> = Result<T, NetworkError>;
