//! Generic transport abstraction for network communication
//!
//! Transports move opaque envelopes between brokers. They know nothing about
//! requests, responses or message schemas; that is the job of the network layer
//! sitting on top.

pub mod error;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use meridian_topology::NodeId;
use std::pin::Pin;
use uuid::Uuid;

pub use error::TransportError;

/// Transport-level message envelope
#[derive(Debug, Clone)]
pub struct TransportEnvelope {
    /// Correlation ID for request/response tracking
    pub correlation_id: Option<Uuid>,
    /// Message type used to route the payload to a handler
    pub message_type: String,
    /// The message payload
    pub payload: Bytes,
    /// The sender of the message
    pub sender: NodeId,
}

/// Stream of envelopes received by a transport
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = TransportEnvelope> + Send>>;

/// Transport trait for sending and receiving envelopes
///
/// Delivery is best effort: an `Ok` from `send_envelope` means the envelope
/// was handed off, not that it arrived.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Node this transport sends as
    fn local_node_id(&self) -> NodeId;

    /// Send an envelope to a specific node
    async fn send_envelope(
        &self,
        recipient: &NodeId,
        payload: &Bytes,
        message_type: &str,
        correlation_id: Option<Uuid>,
    ) -> Result<(), TransportError>;

    /// Stream of incoming envelopes
    ///
    /// The stream ends when the transport shuts down. Every call shares the
    /// same inbox, so there should be a single consumer.
    fn incoming(&self) -> EnvelopeStream;

    /// Shutdown the transport
    async fn shutdown(&self) -> Result<(), TransportError>;
}
