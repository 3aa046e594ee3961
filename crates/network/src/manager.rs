//! Network manager for request/response messaging between brokers

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use meridian_topology::NodeId;
use meridian_transport::{Transport, TransportEnvelope};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{NetworkError, NetworkResult};
use crate::message::{NetworkMessage, RESPONSE_SUFFIX, ResponseFrame, ServiceMessage, response_type};
use crate::service::{Service, ServiceContext, ServiceHandler, create_service_handler};

type PendingRequests = DashMap<Uuid, oneshot::Sender<ResponseFrame>>;
type Handlers = DashMap<String, Arc<dyn ServiceHandler>>;

/// Removes a pending request however its caller stops waiting
struct PendingGuard<'a> {
    pending_requests: &'a PendingRequests,
    correlation_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending_requests.remove(&self.correlation_id);
    }
}

/// Routes requests to services and responses back to their callers
pub struct NetworkManager<T>
where
    T: Transport,
{
    local_node_id: NodeId,
    transport: Arc<T>,
    pending_requests: Arc<PendingRequests>,
    handlers: Arc<Handlers>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl<T> NetworkManager<T>
where
    T: Transport,
{
    /// Create a new network manager
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            local_node_id: transport.local_node_id(),
            transport,
            pending_requests: Arc::new(DashMap::new()),
            handlers: Arc::new(DashMap::new()),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Get local node ID
    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    /// Register the service answering `S::Request`
    pub fn register_service<S: Service>(&self, service: S) -> NetworkResult<()> {
        let message_type = <S::Request as NetworkMessage>::message_type().to_string();

        match self.handlers.entry(message_type.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(NetworkError::HandlerAlreadyRegistered { message_type })
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(create_service_handler(service));
                debug!("Registered service for {}", message_type);
                Ok(())
            }
        }
    }

    /// Requests still waiting for a response
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Start routing incoming envelopes
    pub fn start(&self) {
        let transport = self.transport.clone();
        let pending_requests = self.pending_requests.clone();
        let handlers = self.handlers.clone();
        let task_tracker = self.task_tracker.clone();
        let cancellation = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut incoming = transport.incoming();

            loop {
                let envelope = tokio::select! {
                    envelope = incoming.next() => envelope,
                    _ = cancellation.cancelled() => {
                        debug!("Message router loop cancelled");
                        return;
                    }
                };

                let Some(envelope) = envelope else {
                    debug!("Transport incoming stream ended");
                    return;
                };

                Self::route(
                    envelope,
                    &transport,
                    &pending_requests,
                    &handlers,
                    &task_tracker,
                );
            }
        });

        info!("Network manager started for {}", self.local_node_id);
    }

    fn route(
        envelope: TransportEnvelope,
        transport: &Arc<T>,
        pending_requests: &Arc<PendingRequests>,
        handlers: &Arc<Handlers>,
        task_tracker: &TaskTracker,
    ) {
        let TransportEnvelope {
            correlation_id,
            message_type,
            payload,
            sender,
        } = envelope;

        let Some(correlation_id) = correlation_id else {
            warn!(
                "Dropping {} from {} without correlation ID",
                message_type, sender
            );
            return;
        };

        if message_type.ends_with(RESPONSE_SUFFIX) {
            let Some((_, tx)) = pending_requests.remove(&correlation_id) else {
                debug!(
                    "No pending request for {} from {} ({}), dropping late response",
                    message_type, sender, correlation_id
                );
                return;
            };

            match ResponseFrame::decode(&payload) {
                Ok(frame) => {
                    let _ = tx.send(frame);
                }
                Err(e) => {
                    let _ = tx.send(ResponseFrame::Err(e.to_string()));
                }
            }
            return;
        }

        let handler = handlers.get(&message_type).map(|h| h.value().clone());
        let transport = transport.clone();

        task_tracker.spawn(async move {
            let frame = match handler {
                Some(handler) => {
                    let ctx = ServiceContext {
                        sender,
                        correlation_id,
                    };
                    match handler.handle(payload, ctx).await {
                        Ok(bytes) => ResponseFrame::Ok(bytes),
                        Err(e) => {
                            warn!("Service for {} failed: {}", message_type, e);
                            ResponseFrame::Err(e.to_string())
                        }
                    }
                }
                None => {
                    warn!("No handler for {} from {}", message_type, sender);
                    ResponseFrame::NoHandler(message_type.clone())
                }
            };

            let bytes = match frame.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to encode response for {}: {}", message_type, e);
                    return;
                }
            };

            if let Err(e) = transport
                .send_envelope(
                    &sender,
                    &bytes,
                    &response_type(&message_type),
                    Some(correlation_id),
                )
                .await
            {
                debug!("Failed to send response to {}: {}", sender, e);
            }
        });
    }

    /// Send a typed request and wait up to `timeout` for the typed response
    pub async fn request<M>(
        &self,
        target: NodeId,
        message: M,
        timeout: Duration,
    ) -> NetworkResult<M::Response>
    where
        M: ServiceMessage,
    {
        if self.cancellation_token.is_cancelled() {
            return Err(NetworkError::Shutdown);
        }

        let correlation_id = Uuid::new_v4();
        let message_type = M::message_type();
        let request_bytes: Bytes = message.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending_requests.insert(correlation_id, tx);
        let _pending = PendingGuard {
            pending_requests: &self.pending_requests,
            correlation_id,
        };

        debug!(
            "Sending {} to {} with correlation_id {}",
            message_type, target, correlation_id
        );

        self.transport
            .send_envelope(&target, &request_bytes, message_type, Some(correlation_id))
            .await
            .map_err(NetworkError::Transport)?;

        let frame = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => {
                return Err(NetworkError::ChannelClosed(
                    "Response channel closed".to_string(),
                ));
            }
            Err(_) => return Err(NetworkError::Timeout(timeout)),
        };

        match frame {
            ResponseFrame::Ok(bytes) => M::Response::decode(&bytes),
            ResponseFrame::NoHandler(message_type) => Err(NetworkError::NoHandler { message_type }),
            ResponseFrame::Err(reason) => Err(NetworkError::ServiceError(reason)),
        }
    }

    /// Shutdown the network manager and its transport
    pub async fn shutdown(&self) -> NetworkResult<()> {
        info!("Shutting down network manager for {}", self.local_node_id);

        self.cancellation_token.cancel();
        self.transport.shutdown().await?;
        self.pending_requests.clear();

        self.task_tracker.close();
        if tokio::time::timeout(Duration::from_secs(5), self.task_tracker.wait())
            .await
            .is_err()
        {
            error!("Network manager tasks did not shut down within timeout");
        }

        Ok(())
    }
}
