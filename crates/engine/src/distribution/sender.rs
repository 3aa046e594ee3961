//! Sending pushes to target partition leaders

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_network::{NetworkError, NetworkManager};
use meridian_topology::NodeId;
use meridian_transport::Transport;
use thiserror::Error;

use super::messages::{PushError, PushRequest, PushResponse, PushResult};

/// Why a push did not produce an acknowledgement
#[derive(Debug, Clone, Error)]
pub enum PushFailure {
    /// No response within the request timeout
    #[error("push timed out after {0:?}")]
    Timeout(Duration),

    /// The request or its response was lost
    #[error("network error: {0}")]
    Network(String),

    /// The receiving node answered with an error
    #[error(transparent)]
    Remote(#[from] PushError),
}

impl PushFailure {
    /// Whether the push should be retried against a freshly resolved leader
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(error) => error.is_retryable(),
            Self::Timeout(_) | Self::Network(_) => true,
        }
    }
}

/// Delivers push requests to a node
#[async_trait]
pub trait PushSender: Send + Sync + 'static {
    /// Send `request` to `leader` and wait at most `timeout` for the answer
    async fn push(
        &self,
        leader: NodeId,
        request: PushRequest,
        timeout: Duration,
    ) -> Result<PushResponse, PushFailure>;
}

/// [`PushSender`] backed by the network layer
pub struct NetworkPushSender<T: Transport> {
    network: Arc<NetworkManager<T>>,
}

impl<T: Transport> NetworkPushSender<T> {
    /// Create a sender using `network`
    pub fn new(network: Arc<NetworkManager<T>>) -> Self {
        Self { network }
    }
}

#[async_trait]
impl<T: Transport> PushSender for NetworkPushSender<T> {
    async fn push(
        &self,
        leader: NodeId,
        request: PushRequest,
        timeout: Duration,
    ) -> Result<PushResponse, PushFailure> {
        match self.network.request(leader, request, timeout).await {
            Ok(reply) => PushResult::from(reply).map_err(PushFailure::Remote),
            Err(NetworkError::Timeout(elapsed)) => Err(PushFailure::Timeout(elapsed)),
            Err(e) => Err(PushFailure::Network(e.to_string())),
        }
    }
}
