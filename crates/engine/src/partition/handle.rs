//! Cloneable access to a running partition

use bytes::Bytes;
use meridian_topology::PartitionId;
use tokio::sync::{broadcast, oneshot};

use crate::distribution::{PendingDistribution, PushError, PushRequest, PushResult};
use crate::error::{EngineResult, Error};
use crate::pipeline::{BroadcastListener, CommandResponse, ListenerEvent};
use crate::processors::DistributedResource;
use crate::record::{Intent, ValueType, encode_value};

/// A command submitted by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
    /// Entity kind
    pub value_type: ValueType,
    /// What to do
    pub intent: Intent,
    /// Value, CBOR encoded
    pub payload: Bytes,
}

impl ClientCommand {
    /// Command creating `resource`
    pub fn create<R: DistributedResource>(resource: &R) -> EngineResult<Self> {
        Ok(Self {
            value_type: R::VALUE_TYPE,
            intent: Intent::Create,
            payload: encode_value(resource)?,
        })
    }
}

pub(crate) enum PartitionMessage {
    Submit {
        command: ClientCommand,
        reply: oneshot::Sender<EngineResult<CommandResponse>>,
    },
    Push {
        request: PushRequest,
        reply: oneshot::Sender<PushResult>,
    },
    DiscardDistribution {
        distribution_key: u64,
        reply: oneshot::Sender<EngineResult<Option<PendingDistribution>>>,
    },
    PendingDistribution {
        distribution_key: u64,
        reply: oneshot::Sender<EngineResult<Option<PendingDistribution>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle onto a partition actor
///
/// Once the actor stops (shutdown or lost leadership) every call fails.
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    partition_id: PartitionId,
    mailbox: flume::Sender<PartitionMessage>,
    listener: BroadcastListener,
}

impl PartitionHandle {
    pub(crate) fn new(
        partition_id: PartitionId,
        mailbox: flume::Sender<PartitionMessage>,
        listener: BroadcastListener,
    ) -> Self {
        Self {
            partition_id,
            mailbox,
            listener,
        }
    }

    /// Partition this handle talks to
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Whether the actor has stopped
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_disconnected()
    }

    /// Append and process a client command
    ///
    /// Creations resolve once the resource reached every partition.
    pub async fn submit(&self, command: ClientCommand) -> EngineResult<CommandResponse> {
        let (reply, response) = oneshot::channel();
        self.send(PartitionMessage::Submit { command, reply })
            .await?;
        response.await.map_err(|_| self.stopped())?
    }

    /// Apply a command distributed by another partition
    pub async fn push(&self, request: PushRequest) -> PushResult {
        let partition_id = self.partition_id;
        let unavailable = || PushError::NotLeader {
            partition_id,
            leader: None,
        };

        let (reply, response) = oneshot::channel();
        if self
            .mailbox
            .send_async(PartitionMessage::Push { request, reply })
            .await
            .is_err()
        {
            return Err(unavailable());
        }
        response.await.unwrap_or_else(|_| Err(unavailable()))
    }

    /// Stop a distribution of this partition, returning its entry
    pub async fn discard_distribution(
        &self,
        distribution_key: u64,
    ) -> EngineResult<Option<PendingDistribution>> {
        let (reply, response) = oneshot::channel();
        self.send(PartitionMessage::DiscardDistribution {
            distribution_key,
            reply,
        })
        .await?;
        response.await.map_err(|_| self.stopped())?
    }

    /// A distribution of this partition that has not completed
    pub async fn pending_distribution(
        &self,
        distribution_key: u64,
    ) -> EngineResult<Option<PendingDistribution>> {
        let (reply, response) = oneshot::channel();
        self.send(PartitionMessage::PendingDistribution {
            distribution_key,
            reply,
        })
        .await?;
        response.await.map_err(|_| self.stopped())?
    }

    /// Receive listener events of this partition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.listener.subscribe()
    }

    /// Stop the actor and wait until it has stopped
    pub async fn shutdown(&self) {
        let (reply, stopped) = oneshot::channel();
        if self
            .mailbox
            .send_async(PartitionMessage::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = stopped.await;
        }
    }

    async fn send(&self, message: PartitionMessage) -> EngineResult<()> {
        self.mailbox
            .send_async(message)
            .await
            .map_err(|_| self.stopped())
    }

    fn stopped(&self) -> Error {
        Error::not_leader(self.partition_id, None)
    }
}
