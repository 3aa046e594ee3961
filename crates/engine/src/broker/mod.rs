//! A node of the cluster
//!
//! The broker starts a partition actor for every partition this node leads
//! and stops it when leadership moves elsewhere. Pushes from other nodes
//! arrive through the network layer and are routed to the local actor.

mod builder;

pub use builder::{BrokerBuilder, ProcessorFactory};

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meridian_network::{NetworkManager, NetworkResult, Service, ServiceContext};
use meridian_storage::LogStorageStreaming;
use meridian_store::Store1;
use meridian_topology::{
    LeaderLookup, NodeId, PartitionId, TopologySnapshot, TopologySubscription, TopologyView,
};
use meridian_transport::Transport;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::distribution::{PushError, PushReply, PushRequest, PushResult, PushSender};
use crate::error::{EngineResult, Error};
use crate::partition::{ClientCommand, PartitionActor, PartitionHandle, PartitionParts};
use crate::pipeline::{CommandResponse, ProcessingListener};

struct BrokerInner<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    node_id: NodeId,
    config: EngineConfig,
    network: Arc<NetworkManager<T>>,
    topology: TopologyView,
    subscription: Mutex<Option<TopologySubscription>>,
    log: L,
    store: S,
    sender: Arc<dyn PushSender>,
    processors: ProcessorFactory,
    listeners: Vec<Arc<dyn ProcessingListener>>,
    partitions: DashMap<PartitionId, PartitionHandle>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

/// One node: its partition actors and the service answering pushes
pub struct Broker<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    inner: Arc<BrokerInner<T, L, S>>,
}

impl<T, L, S> Clone for Broker<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, L, S> Broker<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    /// Start assembling a broker
    pub fn builder() -> BrokerBuilder<T, L, S> {
        BrokerBuilder::new()
    }

    /// Node this broker runs as
    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    /// The topology this broker follows
    pub fn topology(&self) -> &TopologyView {
        &self.inner.topology
    }

    /// Register the push service, start the network and follow the topology
    pub async fn start(&self) -> EngineResult<()> {
        let Some(mut subscription) = self.inner.subscription.lock().await.take() else {
            return Err(Error::invalid_state("broker already started"));
        };

        self.inner.network.register_service(PushService {
            inner: self.inner.clone(),
        })?;
        self.inner.network.start();

        self.inner.reconcile(&subscription.current()).await;

        let inner = self.inner.clone();
        let token = self.inner.cancellation_token.clone();
        self.inner.task_tracker.spawn(async move {
            loop {
                tokio::select! {
                    changed = subscription.changed() => match changed {
                        Ok(snapshot) => inner.reconcile(&snapshot).await,
                        Err(_) => {
                            debug!("Topology subscription of {} closed", inner.node_id);
                            return;
                        }
                    },
                    _ = token.cancelled() => return,
                }
            }
        });

        info!("Broker {} started", self.inner.node_id);
        Ok(())
    }

    /// Submit a client command to a partition led by this broker
    pub async fn submit(
        &self,
        partition_id: PartitionId,
        command: ClientCommand,
    ) -> EngineResult<CommandResponse> {
        let handle = self.inner.live_partition(partition_id).ok_or_else(|| {
            Error::not_leader(partition_id, self.inner.topology.current_leader(partition_id))
        })?;
        handle.submit(command).await
    }

    /// Apply a push as if it arrived over the network
    pub async fn push(&self, request: PushRequest) -> PushResult {
        self.inner.push(request).await
    }

    /// Handle of a partition led by this broker
    pub fn partition(&self, partition_id: PartitionId) -> Option<PartitionHandle> {
        self.inner.live_partition(partition_id)
    }

    /// Partitions with a running actor, in ascending order
    pub fn led_partitions(&self) -> Vec<PartitionId> {
        let mut led: Vec<PartitionId> = self
            .inner
            .partitions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| *entry.key())
            .collect();
        led.sort_unstable();
        led
    }

    /// Stop every partition actor and the network
    pub async fn shutdown(&self) -> EngineResult<()> {
        info!("Shutting down broker {}", self.inner.node_id);
        self.inner.cancellation_token.cancel();

        let partitions: Vec<PartitionId> =
            self.inner.partitions.iter().map(|entry| *entry.key()).collect();
        for partition_id in partitions {
            if let Some((_, handle)) = self.inner.partitions.remove(&partition_id) {
                handle.shutdown().await;
            }
        }

        self.inner.network.shutdown().await?;
        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;
        Ok(())
    }
}

impl<T, L, S> BrokerInner<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    /// Run exactly the actors of the partitions `snapshot` says this node leads
    async fn reconcile(&self, snapshot: &TopologySnapshot) {
        if self.cancellation_token.is_cancelled() {
            return;
        }

        let led: BTreeSet<PartitionId> = snapshot
            .partitions_led_by(self.node_id)
            .into_iter()
            .collect();

        let lost: Vec<PartitionId> = self
            .partitions
            .iter()
            .map(|entry| *entry.key())
            .filter(|partition_id| !led.contains(partition_id))
            .collect();
        for partition_id in lost {
            if let Some((_, handle)) = self.partitions.remove(&partition_id) {
                info!("{} no longer leads {}", self.node_id, partition_id);
                handle.shutdown().await;
            }
        }

        for partition_id in led {
            let running = self
                .partitions
                .get(&partition_id)
                .is_some_and(|handle| !handle.is_closed());
            if !running {
                if let Err(e) = self.start_partition(partition_id) {
                    error!("{} failed to start {}: {}", self.node_id, partition_id, e);
                }
            }
        }
    }

    fn start_partition(&self, partition_id: PartitionId) -> EngineResult<PartitionHandle> {
        let parts = PartitionParts {
            partition_id,
            config: self.config.clone(),
            log: self.log.clone(),
            store: self
                .store
                .scope(format!("partition-{}", partition_id.value())),
            sender: self.sender.clone(),
            topology: Arc::new(self.topology.clone()),
            processors: (self.processors)()?,
            listeners: self.listeners.clone(),
        };

        let handle = PartitionActor::spawn(parts, &self.task_tracker);
        self.partitions.insert(partition_id, handle.clone());
        info!("{} leads {}", self.node_id, partition_id);

        Ok(handle)
    }

    /// The running actor of a partition, restarted if it stopped while this node still leads
    fn live_partition(&self, partition_id: PartitionId) -> Option<PartitionHandle> {
        let handle = self.partitions.get(&partition_id).map(|h| h.clone())?;
        if !handle.is_closed() {
            return Some(handle);
        }

        self.partitions.remove(&partition_id);
        if self.cancellation_token.is_cancelled()
            || self.topology.current_leader(partition_id) != Some(self.node_id)
        {
            return None;
        }

        warn!("Restarting stopped actor of {}", partition_id);
        match self.start_partition(partition_id) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("{} failed to restart {}: {}", self.node_id, partition_id, e);
                None
            }
        }
    }

    async fn push(&self, request: PushRequest) -> PushResult {
        match self.live_partition(request.partition_id) {
            Some(handle) => handle.push(request).await,
            None => Err(PushError::NotLeader {
                partition_id: request.partition_id,
                leader: self.topology.current_leader(request.partition_id),
            }),
        }
    }
}

/// Answers pushes from other brokers
struct PushService<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    inner: Arc<BrokerInner<T, L, S>>,
}

#[async_trait]
impl<T, L, S> Service for PushService<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    type Request = PushRequest;

    async fn handle(&self, request: PushRequest, ctx: ServiceContext) -> NetworkResult<PushReply> {
        debug!(
            "Push of distribution {} for {} from {}",
            request.distribution_key, request.partition_id, ctx.sender
        );
        Ok(self.inner.push(request).await.into())
    }
}
