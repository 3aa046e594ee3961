//! Fan-out of pending distributions to every other partition
//!
//! The coordinator is owned by a single partition actor. Push attempts and
//! retry timers run as background tasks, but their outcomes come back as
//! [`CoordinatorEvent`]s that the actor feeds into
//! [`DistributionCoordinator::handle_event`], so all bookkeeping happens on
//! the actor's task.
//!
//! Each target is tracked independently:
//! - the leader is looked up again for every attempt, so failovers are followed
//! - every attempt is numbered; failures and timers of older attempts are ignored
//! - acknowledgements are kept as a set, so duplicates never count twice
//! - there is no maximum number of attempts

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use meridian_store::Store;
use meridian_topology::{LeaderLookup, NodeId, PartitionId};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::completion::{Completion, CompletionHandle};
use super::messages::{PushError, PushRequest, PushResponse};
use super::sender::{PushFailure, PushSender};
use super::store::{PendingDistribution, PendingDistributionStore};
use super::{DistributionError, Distributor};
use crate::config::DistributionConfig;
use crate::error::EngineResult;

/// Outcome of a background push or retry timer
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A push attempt finished
    PushCompleted {
        /// Distribution the push belongs to
        distribution_key: u64,
        /// Target partition
        partition_id: PartitionId,
        /// Attempt number of the push
        attempt: u32,
        /// Acknowledgement or failure
        result: Result<PushResponse, PushFailure>,
    },

    /// The retry delay of a target elapsed
    RetryTarget {
        /// Distribution to retry
        distribution_key: u64,
        /// Target partition
        partition_id: PartitionId,
        /// Attempt that scheduled the retry
        attempt: u32,
    },
}

/// Progress reported when a target acknowledges for the first time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionProgress {
    /// Distribution that progressed
    pub distribution_key: u64,
    /// Partition that acknowledged
    pub partition_id: PartitionId,
    /// Targets still to acknowledge
    pub remaining: usize,
    /// Whether this acknowledgement completed the distribution
    pub completed: bool,
}

#[derive(Debug, Default)]
struct TargetState {
    attempt: u32,
    failures: u32,
}

struct InFlight {
    entry: PendingDistribution,
    targets: BTreeMap<PartitionId, TargetState>,
    acked: BTreeSet<PartitionId>,
    completion: Completion,
}

impl InFlight {
    fn remaining(&self) -> usize {
        self.targets.len() - self.acked.len()
    }
}

/// Distributes commands from one partition to all others
pub struct DistributionCoordinator<S: Store> {
    partition_id: PartitionId,
    config: DistributionConfig,
    store: PendingDistributionStore<S>,
    sender: Arc<dyn PushSender>,
    topology: Arc<dyn LeaderLookup>,
    in_flight: HashMap<u64, InFlight>,
    events_tx: flume::Sender<CoordinatorEvent>,
    events_rx: flume::Receiver<CoordinatorEvent>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl<S: Store> DistributionCoordinator<S> {
    /// Create a coordinator for `partition_id`
    pub fn new(
        partition_id: PartitionId,
        config: DistributionConfig,
        store: PendingDistributionStore<S>,
        sender: Arc<dyn PushSender>,
        topology: Arc<dyn LeaderLookup>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();

        Self {
            partition_id,
            config,
            store,
            sender,
            topology,
            in_flight: HashMap::new(),
            events_tx,
            events_rx,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Events that must be passed back to [`Self::handle_event`]
    pub fn events(&self) -> flume::Receiver<CoordinatorEvent> {
        self.events_rx.clone()
    }

    /// Partitions a distribution started now would be pushed to
    pub fn targets(&self) -> Vec<PartitionId> {
        self.topology
            .partition_ids()
            .into_iter()
            .filter(|id| {
                *id != self.partition_id && !self.config.excluded_partitions.contains(id)
            })
            .collect()
    }

    /// Targets that have not acknowledged a distribution yet
    pub fn remaining_targets(&self, distribution_key: u64) -> Option<usize> {
        self.in_flight
            .get(&distribution_key)
            .map(InFlight::remaining)
    }

    /// A pending distribution, in flight or only stored
    pub async fn pending(&self, distribution_key: u64) -> EngineResult<Option<PendingDistribution>> {
        match self.in_flight.get(&distribution_key) {
            Some(in_flight) => Ok(Some(in_flight.entry.clone())),
            None => self.store.get(distribution_key).await,
        }
    }

    /// Apply the outcome of a background push or timer
    pub async fn handle_event(&mut self, event: CoordinatorEvent) -> Option<DistributionProgress> {
        match event {
            CoordinatorEvent::PushCompleted {
                distribution_key,
                partition_id,
                result: Ok(_),
                ..
            } => self.acknowledge(distribution_key, partition_id).await,
            CoordinatorEvent::PushCompleted {
                distribution_key,
                partition_id,
                attempt,
                result: Err(failure),
            } => {
                self.fail(distribution_key, partition_id, attempt, failure)
                    .await;
                None
            }
            CoordinatorEvent::RetryTarget {
                distribution_key,
                partition_id,
                attempt,
            } => {
                if self.is_current_attempt(distribution_key, partition_id, attempt) {
                    self.start_target(distribution_key, partition_id);
                }
                None
            }
        }
    }

    /// Stop a distribution without waiting for the remaining targets
    ///
    /// Its handle resolves with [`DistributionError::Abandoned`]; responses
    /// still in flight are ignored when they arrive.
    pub async fn discard(&mut self, distribution_key: u64) -> EngineResult<Option<PendingDistribution>> {
        let abandoned = self
            .abandon(
                distribution_key,
                Err(DistributionError::Abandoned {
                    key: distribution_key,
                }),
            )
            .await;

        if let Some(entry) = abandoned {
            info!("Discarded distribution {}", distribution_key);
            return Ok(Some(entry));
        }

        let stored = self.store.get(distribution_key).await?;
        if stored.is_some() {
            self.store.remove(distribution_key).await?;
            info!("Discarded stored distribution {}", distribution_key);
        }
        Ok(stored)
    }

    /// Restart every stored distribution that is not in flight
    ///
    /// Targets are computed from the current topology. Completion of a
    /// recovered distribution is only logged.
    #[instrument(skip(self), fields(partition_id = %self.partition_id))]
    pub async fn recover(&mut self) -> EngineResult<usize> {
        let targets = self.targets();
        let mut recovered = 0;

        for key in self.store.keys().await? {
            if self.in_flight.contains_key(&key) {
                continue;
            }

            let entry = match self.store.get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping unreadable pending distribution {}: {}", key, e);
                    continue;
                }
            };

            if targets.is_empty() {
                debug!("No targets left for recovered distribution {}", key);
                self.store.remove(key).await?;
                continue;
            }

            let handle = self.begin(entry, targets.clone());
            self.task_tracker.spawn(async move {
                match handle.await {
                    Ok(()) => info!("Recovered distribution {} completed", key),
                    Err(DistributionError::Shutdown { .. }) => {
                        debug!("Recovered distribution {} interrupted by shutdown", key)
                    }
                    Err(e) => warn!("Recovered distribution {} did not complete: {}", key, e),
                }
            });
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovered {} pending distributions", recovered);
        }
        Ok(recovered)
    }

    /// Stop every background task
    ///
    /// Distributions stay in the store for the next leader; their handles
    /// resolve with [`DistributionError::Shutdown`].
    pub async fn shutdown(&mut self) {
        self.cancellation_token.cancel();

        for (key, in_flight) in self.in_flight.drain() {
            in_flight
                .completion
                .resolve(Err(DistributionError::Shutdown { key }));
        }

        self.task_tracker.close();
        self.task_tracker.wait().await;
        debug!("Distribution coordinator of {} stopped", self.partition_id);
    }

    fn begin(&mut self, entry: PendingDistribution, targets: Vec<PartitionId>) -> CompletionHandle {
        let key = entry.distribution_key;
        let mut completion = Completion::default();
        let handle = completion.handle(key);

        info!("Distributing {} to {} partitions", key, targets.len());

        self.in_flight.insert(
            key,
            InFlight {
                entry,
                targets: targets
                    .iter()
                    .map(|id| (*id, TargetState::default()))
                    .collect(),
                acked: BTreeSet::new(),
                completion,
            },
        );

        for partition_id in targets {
            self.start_target(key, partition_id);
        }

        handle
    }

    fn is_current_attempt(&self, distribution_key: u64, partition_id: PartitionId, attempt: u32) -> bool {
        self.in_flight
            .get(&distribution_key)
            .filter(|in_flight| !in_flight.acked.contains(&partition_id))
            .and_then(|in_flight| in_flight.targets.get(&partition_id))
            .is_some_and(|target| target.attempt == attempt)
    }

    fn start_target(&mut self, distribution_key: u64, partition_id: PartitionId) {
        let Some(in_flight) = self.in_flight.get_mut(&distribution_key) else {
            return;
        };
        if in_flight.acked.contains(&partition_id) {
            return;
        }
        let payload = in_flight.entry.payload.clone();
        let Some(target) = in_flight.targets.get_mut(&partition_id) else {
            return;
        };

        target.attempt += 1;
        let attempt = target.attempt;

        match self.topology.current_leader(partition_id) {
            Some(leader) => {
                let request = PushRequest {
                    distribution_key,
                    partition_id,
                    payload,
                };
                self.spawn_push(leader, request, attempt);
            }
            None => {
                target.failures += 1;
                if target.failures == 1 {
                    warn!(
                        "No leader known for {} while distributing {}, retrying in {:?}",
                        partition_id, distribution_key, self.config.retry_delay
                    );
                } else {
                    debug!(
                        "Still no leader for {} (attempt {} of distribution {})",
                        partition_id, attempt, distribution_key
                    );
                }
                self.schedule_retry(distribution_key, partition_id, attempt);
            }
        }
    }

    fn spawn_push(&self, leader: NodeId, request: PushRequest, attempt: u32) {
        let sender = self.sender.clone();
        let events = self.events_tx.clone();
        let timeout = self.config.request_timeout;
        let token = self.cancellation_token.clone();

        debug!(
            "Pushing distribution {} to {} on {} (attempt {})",
            request.distribution_key, request.partition_id, leader, attempt
        );

        self.task_tracker.spawn(async move {
            let distribution_key = request.distribution_key;
            let partition_id = request.partition_id;

            tokio::select! {
                result = sender.push(leader, request, timeout) => {
                    let _ = events.send(CoordinatorEvent::PushCompleted {
                        distribution_key,
                        partition_id,
                        attempt,
                        result,
                    });
                }
                _ = token.cancelled() => {}
            }
        });
    }

    fn schedule_retry(&self, distribution_key: u64, partition_id: PartitionId, attempt: u32) {
        let events = self.events_tx.clone();
        let delay = self.config.retry_delay;
        let token = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(CoordinatorEvent::RetryTarget {
                        distribution_key,
                        partition_id,
                        attempt,
                    });
                }
                _ = token.cancelled() => {}
            }
        });
    }

    async fn acknowledge(
        &mut self,
        distribution_key: u64,
        partition_id: PartitionId,
    ) -> Option<DistributionProgress> {
        let Some(in_flight) = self.in_flight.get_mut(&distribution_key) else {
            debug!(
                "Ignoring acknowledgement from {} for unknown distribution {}",
                partition_id, distribution_key
            );
            return None;
        };
        if !in_flight.targets.contains_key(&partition_id) {
            warn!(
                "Ignoring acknowledgement from {} which is not a target of distribution {}",
                partition_id, distribution_key
            );
            return None;
        }
        if !in_flight.acked.insert(partition_id) {
            debug!(
                "Ignoring duplicate acknowledgement from {} for distribution {}",
                partition_id, distribution_key
            );
            return None;
        }

        let remaining = in_flight.remaining();
        debug!(
            "{} acknowledged distribution {}, {} targets remaining",
            partition_id, distribution_key, remaining
        );

        if remaining > 0 {
            return Some(DistributionProgress {
                distribution_key,
                partition_id,
                remaining,
                completed: false,
            });
        }

        let in_flight = self.in_flight.remove(&distribution_key)?;
        if let Err(e) = self.store.remove(distribution_key).await {
            warn!(
                "Failed to remove completed distribution {}: {}",
                distribution_key, e
            );
        }
        info!("Distribution {} completed", distribution_key);
        in_flight.completion.resolve(Ok(()));

        Some(DistributionProgress {
            distribution_key,
            partition_id,
            remaining: 0,
            completed: true,
        })
    }

    async fn fail(
        &mut self,
        distribution_key: u64,
        partition_id: PartitionId,
        attempt: u32,
        failure: PushFailure,
    ) {
        let Some(in_flight) = self.in_flight.get_mut(&distribution_key) else {
            debug!(
                "Ignoring failure from {} for unknown distribution {}: {}",
                partition_id, distribution_key, failure
            );
            return;
        };
        if in_flight.acked.contains(&partition_id) {
            return;
        }
        let Some(target) = in_flight.targets.get_mut(&partition_id) else {
            return;
        };
        if target.attempt != attempt {
            debug!(
                "Ignoring stale failure of attempt {} for {} (current attempt {})",
                attempt, partition_id, target.attempt
            );
            return;
        }

        if !failure.is_retryable() {
            warn!(
                "{} refused distribution {}, abandoning it: {}",
                partition_id, distribution_key, failure
            );
            let reason = match failure {
                PushFailure::Remote(PushError::Rejected { reason, .. }) => reason,
                other => other.to_string(),
            };
            self.abandon(
                distribution_key,
                Err(DistributionError::Rejected {
                    key: distribution_key,
                    partition_id,
                    reason,
                }),
            )
            .await;
            return;
        }

        target.failures += 1;
        if target.failures == 1 {
            warn!(
                "Push of distribution {} to {} failed, retrying in {:?}: {}",
                distribution_key, partition_id, self.config.retry_delay, failure
            );
        } else {
            debug!(
                "Push of distribution {} to {} failed again (attempt {}): {}",
                distribution_key, partition_id, attempt, failure
            );
        }
        self.schedule_retry(distribution_key, partition_id, attempt);
    }

    async fn abandon(
        &mut self,
        distribution_key: u64,
        result: Result<(), DistributionError>,
    ) -> Option<PendingDistribution> {
        let in_flight = self.in_flight.remove(&distribution_key)?;
        if let Err(e) = self.store.remove(distribution_key).await {
            warn!(
                "Failed to remove abandoned distribution {}: {}",
                distribution_key, e
            );
        }
        in_flight.completion.resolve(result);
        Some(in_flight.entry)
    }
}

#[async_trait]
impl<S: Store> Distributor for DistributionCoordinator<S> {
    async fn distribute(
        &mut self,
        distribution_key: u64,
        source_position: u64,
        payload: Bytes,
    ) -> Result<CompletionHandle, DistributionError> {
        if let Some(in_flight) = self.in_flight.get_mut(&distribution_key) {
            if in_flight.entry.payload == payload {
                debug!("Distribution {} is already in flight", distribution_key);
                return Ok(in_flight.completion.handle(distribution_key));
            }
            return Err(DistributionError::DuplicateKey {
                key: distribution_key,
            });
        }

        let targets = self.targets();
        if targets.is_empty() {
            debug!("Distribution {} has no targets", distribution_key);
            return Ok(CompletionHandle::ready(distribution_key, Ok(())));
        }

        let entry = self
            .store
            .put(distribution_key, payload, source_position)
            .await
            .map_err(|e| DistributionError::Store {
                key: distribution_key,
                reason: e.to_string(),
            })?;

        Ok(self.begin(entry, targets))
    }
}
