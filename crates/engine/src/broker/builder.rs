//! Broker builder pattern

use std::sync::Arc;

use dashmap::DashMap;
use meridian_network::NetworkManager;
use meridian_storage::LogStorageStreaming;
use meridian_store::Store1;
use meridian_topology::{TopologySubscription, TopologyView};
use meridian_transport::Transport;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EngineConfig;
use crate::distribution::NetworkPushSender;
use crate::error::{EngineResult, Error, ErrorKind};
use crate::pipeline::{ProcessingListener, RecordProcessors};
use crate::processors;

use super::{Broker, BrokerInner};

/// Builds the processor registry of each partition actor
pub type ProcessorFactory = Arc<dyn Fn() -> EngineResult<RecordProcessors> + Send + Sync>;

/// Broker builder
pub struct BrokerBuilder<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    config: Option<EngineConfig>,
    transport: Option<Arc<T>>,
    topology: Option<(TopologyView, TopologySubscription)>,
    log: Option<L>,
    store: Option<S>,
    listeners: Vec<Arc<dyn ProcessingListener>>,
    processors: Option<ProcessorFactory>,
}

impl<T, L, S> Default for BrokerBuilder<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, L, S> BrokerBuilder<T, L, S>
where
    T: Transport,
    L: LogStorageStreaming,
    S: Store1,
{
    /// Create a new broker builder
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            topology: None,
            log: None,
            store: None,
            listeners: Vec::new(),
            processors: None,
        }
    }

    /// Set configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the transport; the broker runs as its local node
    pub fn with_transport(mut self, transport: Arc<T>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the topology view and the subscription that drives leadership changes
    pub fn with_topology(mut self, view: TopologyView, subscription: TopologySubscription) -> Self {
        self.topology = Some((view, subscription));
        self
    }

    /// Set the log storage holding every partition's records
    pub fn with_log_storage(mut self, log: L) -> Self {
        self.log = Some(log);
        self
    }

    /// Set the store holding pending distributions
    pub fn with_store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a listener notified by every partition actor
    pub fn with_listener(mut self, listener: Arc<dyn ProcessingListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replace the default processors
    pub fn with_processors<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> EngineResult<RecordProcessors> + Send + Sync + 'static,
    {
        self.processors = Some(Arc::new(factory));
        self
    }

    /// Build the broker
    pub fn build(self) -> EngineResult<Broker<T, L, S>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| Error::with_context(ErrorKind::Configuration, "Transport not set"))?;

        let (topology, subscription) = self
            .topology
            .ok_or_else(|| Error::with_context(ErrorKind::Configuration, "Topology not set"))?;

        let log = self
            .log
            .ok_or_else(|| Error::with_context(ErrorKind::Configuration, "Log storage not set"))?;

        let store = self
            .store
            .ok_or_else(|| Error::with_context(ErrorKind::Configuration, "Store not set"))?;

        let processors: ProcessorFactory = match self.processors {
            Some(factory) => factory,
            None => Arc::new(processors::default_processors),
        };

        let network = Arc::new(NetworkManager::new(transport));
        let node_id = network.local_node_id();

        let inner = BrokerInner {
            node_id,
            config,
            sender: Arc::new(NetworkPushSender::new(network.clone())),
            network,
            topology,
            subscription: Mutex::new(Some(subscription)),
            log,
            store,
            processors,
            listeners: self.listeners,
            partitions: DashMap::new(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        Ok(Broker {
            inner: Arc::new(inner),
        })
    }
}
