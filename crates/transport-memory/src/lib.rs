//! In-memory transport implementation for testing
//!
//! A [`MemoryNetwork`] is a hub that routes envelopes between the transports
//! registered on it. Each test builds its own hub, so node IDs never clash
//! across tests. The hub also injects faults: links can be cut one way or
//! both ways, and nodes can be isolated entirely.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use meridian_topology::NodeId;
use meridian_transport::{EnvelopeStream, Transport, TransportEnvelope, TransportError};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

#[derive(Default)]
struct NetworkInner {
    inboxes: DashMap<NodeId, flume::Sender<TransportEnvelope>>,
    blocked_links: DashSet<(NodeId, NodeId)>,
    isolated: DashSet<NodeId>,
}

/// Hub connecting in-memory transports
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport for `node_id`
    pub fn transport(&self, node_id: NodeId) -> Result<MemoryTransport, TransportError> {
        let (tx, rx) = flume::unbounded();

        match self.inner.inboxes.entry(node_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::Other(format!(
                    "Node {node_id} already has a transport"
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }

        info!("Memory transport registered for {}", node_id);

        Ok(MemoryTransport {
            node_id,
            network: self.clone(),
            inbox: rx,
        })
    }

    /// Drop every envelope sent from `from` to `to`
    pub fn block(&self, from: NodeId, to: NodeId) {
        debug!("Blocking link {} -> {}", from, to);
        self.inner.blocked_links.insert((from, to));
    }

    /// Drop envelopes in both directions between `a` and `b`
    pub fn partition(&self, a: NodeId, b: NodeId) {
        self.block(a, b);
        self.block(b, a);
    }

    /// Drop every envelope sent to or from `node_id`
    pub fn isolate(&self, node_id: NodeId) {
        debug!("Isolating {}", node_id);
        self.inner.isolated.insert(node_id);
    }

    /// Restore every blocked link and isolated node
    pub fn heal(&self) {
        debug!("Healing memory network");
        self.inner.blocked_links.clear();
        self.inner.isolated.clear();
    }

    fn is_dropped(&self, from: NodeId, to: NodeId) -> bool {
        self.inner.isolated.contains(&from)
            || self.inner.isolated.contains(&to)
            || self.inner.blocked_links.contains(&(from, to))
    }

    fn inbox(&self, node_id: &NodeId) -> Option<flume::Sender<TransportEnvelope>> {
        self.inner.inboxes.get(node_id).map(|tx| tx.clone())
    }

    fn unregister(&self, node_id: &NodeId) -> bool {
        self.inner.inboxes.remove(node_id).is_some()
    }
}

impl Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("nodes", &self.inner.inboxes.len())
            .field("blocked_links", &self.inner.blocked_links.len())
            .field("isolated", &self.inner.isolated.len())
            .finish()
    }
}

/// Memory transport bound to one node of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    node_id: NodeId,
    network: MemoryNetwork,
    inbox: flume::Receiver<TransportEnvelope>,
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("node_id", &self.node_id)
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_node_id(&self) -> NodeId {
        self.node_id
    }

    async fn send_envelope(
        &self,
        recipient: &NodeId,
        payload: &Bytes,
        message_type: &str,
        correlation_id: Option<Uuid>,
    ) -> Result<(), TransportError> {
        if self.network.inbox(&self.node_id).is_none() {
            return Err(TransportError::Shutdown);
        }

        if self.network.is_dropped(self.node_id, *recipient) {
            trace!(
                "Dropping {} from {} to {}",
                message_type, self.node_id, recipient
            );
            return Ok(());
        }

        let inbox =
            self.network
                .inbox(recipient)
                .ok_or_else(|| TransportError::ConnectionFailed {
                    node: *recipient,
                    reason: "no transport registered".to_string(),
                })?;

        trace!(
            "Delivering {} ({} bytes) from {} to {}",
            message_type,
            payload.len(),
            self.node_id,
            recipient
        );

        inbox
            .send_async(TransportEnvelope {
                correlation_id,
                message_type: message_type.to_string(),
                payload: payload.clone(),
                sender: self.node_id,
            })
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                node: *recipient,
                reason: "inbox closed".to_string(),
            })
    }

    fn incoming(&self) -> EnvelopeStream {
        Box::pin(self.inbox.clone().into_stream())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.network.unregister(&self.node_id) {
            info!("Memory transport for {} shut down", self.node_id);
        }
        Ok(())
    }
}
