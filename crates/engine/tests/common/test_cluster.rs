//! A cluster of brokers sharing one in-memory network, log and store

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_engine::{
    Broker, ClientCommand, CommandResponse, EngineConfig, EngineResult, Record, RecordType,
    ValueType,
    record::{Intent, decode_value},
};
use meridian_storage::{LogStorage, StorageNamespace};
use meridian_storage_memory::MemoryStorage;
use meridian_store::Store1;
use meridian_topology::{NodeId, PartitionId, TopologyEvent, TopologyManager, TopologySnapshot};
use meridian_transport_memory::{MemoryNetwork, MemoryTransport};
use serde::de::DeserializeOwned;
use tracing::info;

pub type TestBroker<S> = Broker<MemoryTransport, MemoryStorage, S>;

/// Brokers whose partitions share one log, the way a replicated log would
pub struct TestCluster<S: Store1> {
    pub network: MemoryNetwork,
    pub log: MemoryStorage,
    pub store: S,
    topology: Mutex<TopologyManager>,
    config: EngineConfig,
    brokers: Mutex<BTreeMap<NodeId, TestBroker<S>>>,
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meridian_engine=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Short timeouts so failover scenarios finish quickly
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.distribution.request_timeout = Duration::from_millis(300);
    config.distribution.retry_delay = Duration::from_millis(20);
    config.processing.retry_delay = Duration::from_millis(20);
    config
}

pub fn node(id: u32) -> NodeId {
    NodeId::new(id)
}

pub fn partition(id: u32) -> PartitionId {
    PartitionId::new(id)
}

impl<S: Store1> TestCluster<S> {
    /// Start `nodes` brokers; partition `p` is led by node `(p - 1) % nodes + 1`
    pub async fn start(store: S, nodes: u32, partitions: u32) -> Self {
        init_logging();

        let mut manager = TopologyManager::new(TopologySnapshot::with_partition_count(partitions));
        for id in 1..=nodes {
            manager
                .apply(TopologyEvent::MemberAdded {
                    node_id: node(id),
                    address: format!("memory://{id}"),
                })
                .unwrap();
        }
        for p in 1..=partitions {
            manager
                .apply(TopologyEvent::LeadershipChanged {
                    node_id: node((p - 1) % nodes + 1),
                    partition_id: partition(p),
                })
                .unwrap();
        }

        let cluster = Self {
            network: MemoryNetwork::new(),
            log: MemoryStorage::new(),
            store,
            topology: Mutex::new(manager),
            config: test_config(),
            brokers: Mutex::new(BTreeMap::new()),
        };

        for id in 1..=nodes {
            cluster.start_broker(node(id)).await;
        }
        for p in 1..=partitions {
            cluster.wait_for_leader(partition(p)).await;
        }

        cluster
    }

    /// Start (or restart) the broker of `node_id`
    pub async fn start_broker(&self, node_id: NodeId) -> TestBroker<S> {
        let transport = self.network.transport(node_id).unwrap();
        let (view, subscription) = {
            let topology = self.topology.lock().unwrap();
            (topology.view(), topology.subscribe())
        };

        let broker = Broker::builder()
            .with_config(self.config.clone())
            .with_transport(Arc::new(transport))
            .with_topology(view, subscription)
            .with_log_storage(self.log.clone())
            .with_store(self.store.clone())
            .build()
            .unwrap();
        broker.start().await.unwrap();

        info!("Started broker {}", node_id);
        self.brokers.lock().unwrap().insert(node_id, broker.clone());
        broker
    }

    /// Shut the broker of `node_id` down; its partitions keep their leader until told otherwise
    pub async fn stop_broker(&self, node_id: NodeId) {
        let broker = self.brokers.lock().unwrap().remove(&node_id);
        if let Some(broker) = broker {
            broker.shutdown().await.unwrap();
        }
    }

    pub fn broker(&self, node_id: NodeId) -> TestBroker<S> {
        self.brokers.lock().unwrap().get(&node_id).cloned().unwrap()
    }

    /// Broker currently leading `partition_id`
    pub fn leader_of(&self, partition_id: PartitionId) -> TestBroker<S> {
        let leader = self
            .topology
            .lock()
            .unwrap()
            .snapshot()
            .leader(partition_id)
            .unwrap();
        self.broker(leader)
    }

    pub fn apply(&self, event: TopologyEvent) {
        self.topology.lock().unwrap().apply(event).unwrap();
    }

    /// Hand leadership of `partition_id` to `node_id` and wait for its actor
    pub async fn move_leader(&self, partition_id: PartitionId, node_id: NodeId) {
        self.apply(TopologyEvent::LeadershipChanged {
            node_id,
            partition_id,
        });
        self.wait_for_leader(partition_id).await;
    }

    /// Wait until the leader of `partition_id` runs its actor
    pub async fn wait_for_leader(&self, partition_id: PartitionId) {
        let leader = self
            .topology
            .lock()
            .unwrap()
            .snapshot()
            .leader(partition_id)
            .unwrap();
        wait_until(|| async move {
            self.brokers
                .lock()
                .unwrap()
                .get(&leader)
                .is_some_and(|broker| broker.led_partitions().contains(&partition_id))
        })
        .await;
    }

    pub async fn submit(
        &self,
        partition_id: PartitionId,
        command: ClientCommand,
    ) -> EngineResult<CommandResponse> {
        self.leader_of(partition_id).submit(partition_id, command).await
    }

    /// Every record in the log of `partition_id`
    pub async fn records(&self, partition_id: PartitionId) -> Vec<Record> {
        let namespace = StorageNamespace::new(format!("partition-{}", partition_id.value()));
        self.log
            .read_range(&namespace, 1, u64::MAX)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, bytes)| Record::decode(&bytes).unwrap())
            .collect()
    }

    /// Values of the events with `value_type` and `intent` in the log of `partition_id`
    pub async fn events<T: DeserializeOwned>(
        &self,
        partition_id: PartitionId,
        value_type: ValueType,
        intent: Intent,
    ) -> Vec<T> {
        self.records(partition_id)
            .await
            .into_iter()
            .filter(|record| {
                record.record_type == RecordType::Event
                    && record.value_type == value_type
                    && record.intent == intent
            })
            .map(|record| decode_value(&record.payload).unwrap())
            .collect()
    }

    pub async fn shutdown(&self) {
        let brokers: Vec<_> = std::mem::take(&mut *self.brokers.lock().unwrap())
            .into_values()
            .collect();
        for broker in brokers {
            broker.shutdown().await.unwrap();
        }
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
