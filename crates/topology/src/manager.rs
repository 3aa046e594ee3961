//! Single writer of the cluster topology

use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{TopologyError, TopologyEvent, TopologySnapshot, TopologyView};

/// Receives a notification every time a new snapshot is published
pub struct TopologySubscription {
    receiver: watch::Receiver<Arc<TopologySnapshot>>,
}

impl TopologySubscription {
    /// Wait until a snapshot newer than the last observed one is published
    pub async fn changed(&mut self) -> Result<Arc<TopologySnapshot>, TopologyError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| TopologyError::FeedClosed)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// The most recently published snapshot
    pub fn current(&self) -> Arc<TopologySnapshot> {
        self.receiver.borrow().clone()
    }
}

/// Folds clustering events into snapshots and publishes them atomically
///
/// There is exactly one manager per node; taking `&mut self` in `apply` keeps
/// it the only writer. Readers use [`TopologyView`] or a subscription.
pub struct TopologyManager {
    current: Arc<ArcSwap<TopologySnapshot>>,
    broadcaster: watch::Sender<Arc<TopologySnapshot>>,
}

impl TopologyManager {
    /// Create a manager publishing `initial` as the first snapshot
    pub fn new(initial: TopologySnapshot) -> Self {
        let initial = Arc::new(initial);
        let (broadcaster, _) = watch::channel(initial.clone());

        Self {
            current: Arc::new(ArcSwap::new(initial)),
            broadcaster,
        }
    }

    /// Read-only view sharing this manager's snapshot pointer
    pub fn view(&self) -> TopologyView {
        TopologyView::new(self.current.clone())
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> TopologySubscription {
        TopologySubscription {
            receiver: self.broadcaster.subscribe(),
        }
    }

    /// The latest snapshot
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.load_full()
    }

    /// Apply a single event and publish the resulting snapshot
    pub fn apply(&mut self, event: TopologyEvent) -> Result<Arc<TopologySnapshot>, TopologyError> {
        let next = Arc::new(self.current.load().apply(&event)?);

        debug!(
            "Applied {:?}, publishing topology version {}",
            event,
            next.version()
        );

        self.current.store(next.clone());
        self.broadcaster.send_replace(next.clone());

        Ok(next)
    }

    /// Consume events from the clustering layer until the feed closes or `token` is cancelled
    ///
    /// Invalid events are logged and skipped; they never stop the feed.
    pub fn spawn_feed(
        mut self,
        feed: flume::Receiver<TopologyEvent>,
        task_tracker: &TaskTracker,
        cancellation_token: &CancellationToken,
    ) {
        let token = cancellation_token.clone();

        task_tracker.spawn(async move {
            info!("Starting topology feed");

            loop {
                tokio::select! {
                    event = feed.recv_async() => {
                        match event {
                            Ok(event) => {
                                if let Err(e) = self.apply(event.clone()) {
                                    warn!("Ignoring topology event {:?}: {}", event, e);
                                }
                            }
                            Err(_) => {
                                info!("Topology feed closed");
                                return;
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        info!("Topology feed shutting down");
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LeaderLookup, NodeId, PartitionId};
    use std::time::Duration;

    #[tokio::test]
    async fn test_view_observes_published_snapshot() {
        let mut manager = TopologyManager::new(TopologySnapshot::with_partition_count(3));
        let view = manager.view();

        assert_eq!(view.current_leader(PartitionId::new(2)), None);

        manager
            .apply(TopologyEvent::MemberAdded {
                node_id: NodeId::new(1),
                address: "127.0.0.1:26501".to_string(),
            })
            .unwrap();
        manager
            .apply(TopologyEvent::LeadershipChanged {
                node_id: NodeId::new(1),
                partition_id: PartitionId::new(2),
            })
            .unwrap();

        assert_eq!(view.current_leader(PartitionId::new(2)), Some(NodeId::new(1)));
        assert_eq!(view.partition_ids().len(), 3);
    }

    #[tokio::test]
    async fn test_feed_publishes_to_subscribers_and_skips_invalid_events() {
        let manager = TopologyManager::new(TopologySnapshot::with_partition_count(1));
        let view = manager.view();
        let mut subscription = manager.subscribe();
        let (tx, rx) = flume::unbounded();
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();

        manager.spawn_feed(rx, &tracker, &token);

        // Leadership for a node that never joined is skipped
        tx.send(TopologyEvent::LeadershipChanged {
            node_id: NodeId::new(5),
            partition_id: PartitionId::new(1),
        })
        .unwrap();
        tx.send(TopologyEvent::MemberAdded {
            node_id: NodeId::new(5),
            address: "127.0.0.1:26505".to_string(),
        })
        .unwrap();
        tx.send(TopologyEvent::LeadershipChanged {
            node_id: NodeId::new(5),
            partition_id: PartitionId::new(1),
        })
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let snapshot = subscription.changed().await.unwrap();
                if snapshot.leader(PartitionId::new(1)).is_some() {
                    break;
                }
            }
        })
        .await
        .expect("leadership change was never published");

        assert_eq!(view.current_leader(PartitionId::new(1)), Some(NodeId::new(5)));
        assert_eq!(view.version(), 2);

        token.cancel();
        tracker.close();
        tracker.wait().await;
    }
}
