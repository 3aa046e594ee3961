//! The task owning one partition

use std::collections::VecDeque;
use std::sync::Arc;

use meridian_storage::{LogStorageStreaming, StorageNamespace};
use meridian_store::Store;
use meridian_topology::{LeaderLookup, PartitionId};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::handle::{ClientCommand, PartitionHandle, PartitionMessage};
use super::state::PartitionState;
use crate::config::EngineConfig;
use crate::distribution::{
    CompletionHandle, CoordinatorEvent, DistributionCoordinator, DistributionError,
    PendingDistributionStore, PushError, PushRequest, PushResponse, PushResult, PushSender,
};
use crate::error::{EngineResult, Error};
use crate::pipeline::{
    BroadcastListener, CommandResponse, ProcessingError, ProcessingListener, ProcessingListeners,
    RecordProcessors, RecordWriter, SideEffects, StageOutcome,
};
use crate::record::{DistributedCommand, KeyGenerator, Record, Rejection, RejectionType};

/// Who is waiting for the outcome of a command
enum Responder {
    Client(oneshot::Sender<EngineResult<CommandResponse>>),
    Push {
        distribution_key: u64,
        partition_id: PartitionId,
        reply: oneshot::Sender<PushResult>,
    },
    /// Commands processed after a restart
    Nobody,
}

impl Responder {
    fn respond(self, response: Option<CommandResponse>) {
        match self {
            Self::Client(reply) => {
                let _ = reply.send(
                    response.ok_or_else(|| Error::invalid_state("command produced no response")),
                );
            }
            Self::Push {
                distribution_key,
                partition_id,
                reply,
            } => {
                let result = match response {
                    Some(CommandResponse::Rejected(rejection)) => Err(PushError::Rejected {
                        partition_id,
                        reason: rejection.to_string(),
                    }),
                    _ => Ok(PushResponse {
                        distribution_key,
                        partition_id,
                    }),
                };
                let _ = reply.send(result);
            }
            Self::Nobody => {}
        }
    }

    fn processing_failed(self, error: ProcessingError) {
        match self {
            Self::Client(reply) => {
                let _ = reply.send(Err(error.into()));
            }
            Self::Push {
                partition_id,
                reply,
                ..
            } => {
                let _ = reply.send(Err(PushError::Rejected {
                    partition_id,
                    reason: error.to_string(),
                }));
            }
            Self::Nobody => {}
        }
    }

    fn distribution_failed(self, error: DistributionError) {
        match self {
            Self::Client(reply) => {
                let _ = reply.send(Err(error.into()));
            }
            Self::Push {
                partition_id,
                reply,
                ..
            } => {
                let _ = reply.send(Err(PushError::PartitionUnavailable { partition_id }));
            }
            Self::Nobody => {}
        }
    }

    fn unavailable(self, partition_id: PartitionId) {
        match self {
            Self::Client(reply) => {
                let _ = reply.send(Err(Error::not_leader(partition_id, None)));
            }
            Self::Push { reply, .. } => {
                let _ = reply.send(Err(PushError::NotLeader {
                    partition_id,
                    leader: None,
                }));
            }
            Self::Nobody => {}
        }
    }
}

/// Work held back while an earlier command waits to be retried
enum Queued {
    Message(PartitionMessage),
    Appended(Record, Responder),
}

/// Everything a partition actor is built from
pub(crate) struct PartitionParts<L, S> {
    pub(crate) partition_id: PartitionId,
    pub(crate) config: EngineConfig,
    pub(crate) log: L,
    pub(crate) store: S,
    pub(crate) sender: Arc<dyn PushSender>,
    pub(crate) topology: Arc<dyn LeaderLookup>,
    pub(crate) processors: RecordProcessors,
    pub(crate) listeners: Vec<Arc<dyn ProcessingListener>>,
}

pub(crate) struct PartitionActor<L: LogStorageStreaming, S: Store> {
    partition_id: PartitionId,
    config: EngineConfig,
    log: L,
    namespace: StorageNamespace,
    next_position: u64,
    key_generator: KeyGenerator,
    state: PartitionState,
    processors: RecordProcessors,
    listeners: ProcessingListeners,
    coordinator: DistributionCoordinator<S>,
    mailbox: flume::Receiver<PartitionMessage>,
    retrying: Option<(Record, Responder)>,
    retry_at: Option<Instant>,
    backlog: VecDeque<Queued>,
    responders: TaskTracker,
}

impl<L: LogStorageStreaming, S: Store> PartitionActor<L, S> {
    /// Spawn the actor on `task_tracker`
    pub(crate) fn spawn(parts: PartitionParts<L, S>, task_tracker: &TaskTracker) -> PartitionHandle {
        let PartitionParts {
            partition_id,
            config,
            log,
            store,
            sender,
            topology,
            processors,
            listeners: extra_listeners,
        } = parts;

        let (mailbox_tx, mailbox) = flume::bounded(config.partition.mailbox_capacity);
        let broadcast = BroadcastListener::new(config.partition.event_capacity);

        let mut listeners = ProcessingListeners::new();
        listeners.add(Arc::new(broadcast.clone()));
        for listener in extra_listeners {
            listeners.add(listener);
        }

        let coordinator = DistributionCoordinator::new(
            partition_id,
            config.distribution.clone(),
            PendingDistributionStore::new(store),
            sender,
            topology,
        );

        let actor = Self {
            partition_id,
            namespace: StorageNamespace::new(format!("partition-{}", partition_id.value())),
            config,
            log,
            next_position: 1,
            key_generator: KeyGenerator::new(partition_id),
            state: PartitionState::default(),
            processors,
            listeners,
            coordinator,
            mailbox,
            retrying: None,
            retry_at: None,
            backlog: VecDeque::new(),
            responders: TaskTracker::new(),
        };
        task_tracker.spawn(actor.run());

        PartitionHandle::new(partition_id, mailbox_tx, broadcast)
    }

    async fn run(mut self) {
        if let Err(e) = self.recover().await {
            error!("{} failed to recover: {}", self.partition_id, e);
            self.stop(None).await;
            return;
        }
        info!(
            "{} is processing from position {}",
            self.partition_id, self.next_position
        );

        let events = self.coordinator.events();
        let mut shutdown = None;

        loop {
            let retry_at = self.retry_at;

            let result = tokio::select! {
                message = self.mailbox.recv_async() => match message {
                    Ok(PartitionMessage::Shutdown { reply }) => {
                        shutdown = Some(reply);
                        break;
                    }
                    Ok(message) => self.handle_message(message).await,
                    Err(_) => break,
                },
                Ok(event) = events.recv_async() => {
                    self.handle_coordinator_event(event).await;
                    Ok(())
                }
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry().await
                }
            };

            if let Err(e) = result {
                error!("{} stopped processing: {}", self.partition_id, e);
                break;
            }
        }

        self.stop(shutdown).await;
    }

    /// Rebuild state from the log and restart pending distributions
    #[instrument(skip(self), fields(partition_id = %self.partition_id))]
    async fn recover(&mut self) -> EngineResult<()> {
        if let Some((first, last)) = self.log.bounds(&self.namespace).await? {
            self.next_position = last + 1;

            // The highest follow-up tells which commands were fully processed
            let mut answered = None;
            let mut stream = self.log.stream_range(&self.namespace, first, None).await?;
            while let Some(entry) = stream.next().await {
                let (_, bytes) = entry?;
                let record = Record::decode(&bytes)?;
                self.key_generator.observe(record.key);
                answered = answered.max(record.source_record_position);
            }

            let mut replayed = 0;
            let mut stream = self.log.stream_range(&self.namespace, first, None).await?;
            while let Some(entry) = stream.next().await {
                let (_, bytes) = entry?;
                let record = Record::decode(&bytes)?;

                if !record.is_command() {
                    self.listeners.skipped(&record);
                    continue;
                }

                if answered.is_some_and(|answered| record.position <= answered) {
                    if let Err(e) = self.processors.replay(&record, &mut self.state) {
                        warn!("Replaying command at {} failed: {}", record.position, e);
                    }
                    replayed += 1;
                } else {
                    self.backlog
                        .push_back(Queued::Appended(record, Responder::Nobody));
                }
            }

            info!(
                "Replayed {} commands, {} left to process",
                replayed,
                self.backlog.len()
            );
        }

        self.coordinator.recover().await?;
        self.drain_backlog().await
    }

    async fn handle_message(&mut self, message: PartitionMessage) -> EngineResult<()> {
        match message {
            message @ (PartitionMessage::Submit { .. } | PartitionMessage::Push { .. })
                if self.retrying.is_some() =>
            {
                self.backlog.push_back(Queued::Message(message));
                Ok(())
            }
            PartitionMessage::Submit { command, reply } => {
                self.submit(command, Responder::Client(reply)).await
            }
            PartitionMessage::Push { request, reply } => self.push(request, reply).await,
            PartitionMessage::DiscardDistribution {
                distribution_key,
                reply,
            } => {
                let _ = reply.send(self.coordinator.discard(distribution_key).await);
                Ok(())
            }
            PartitionMessage::PendingDistribution {
                distribution_key,
                reply,
            } => {
                let _ = reply.send(self.coordinator.pending(distribution_key).await);
                Ok(())
            }
            PartitionMessage::Shutdown { reply } => {
                // Only reachable from the backlog; the run loop stops on shutdown
                let _ = reply.send(());
                Ok(())
            }
        }
    }

    async fn handle_coordinator_event(&mut self, event: CoordinatorEvent) {
        if let Some(progress) = self.coordinator.handle_event(event).await {
            debug!(
                "Distribution {} acknowledged by {}, {} remaining",
                progress.distribution_key, progress.partition_id, progress.remaining
            );
        }
    }

    async fn submit(&mut self, command: ClientCommand, responder: Responder) -> EngineResult<()> {
        let mut record = Record::command(
            self.partition_id,
            command.value_type,
            command.intent,
            command.payload,
        );
        record.key = self.key_generator.next_key();

        self.append_and_process(record, responder).await
    }

    async fn push(&mut self, request: PushRequest, reply: oneshot::Sender<PushResult>) -> EngineResult<()> {
        if request.partition_id != self.partition_id {
            warn!(
                "{} received a push for {}",
                self.partition_id, request.partition_id
            );
            let _ = reply.send(Err(PushError::PartitionUnavailable {
                partition_id: request.partition_id,
            }));
            return Ok(());
        }

        let distributed = match DistributedCommand::decode(&request.payload) {
            Ok(distributed) => distributed,
            Err(e) => {
                warn!(
                    "Refusing malformed distribution {}: {}",
                    request.distribution_key, e
                );
                let _ = reply.send(Err(PushError::Rejected {
                    partition_id: self.partition_id,
                    reason: e.to_string(),
                }));
                return Ok(());
            }
        };

        let record = distributed.into_command(self.partition_id, request.distribution_key);
        let responder = Responder::Push {
            distribution_key: request.distribution_key,
            partition_id: self.partition_id,
            reply,
        };

        self.append_and_process(record, responder).await
    }

    async fn append_and_process(&mut self, mut command: Record, responder: Responder) -> EngineResult<()> {
        if let Err(e) = self.append(std::slice::from_mut(&mut command)).await {
            responder.unavailable(self.partition_id);
            return Err(e);
        }

        self.process(command, responder).await
    }

    /// Run a command that is already in the log through the processors
    async fn process(&mut self, command: Record, responder: Responder) -> EngineResult<()> {
        let mut side_effects = SideEffects::new(&mut self.coordinator, &self.listeners);
        let outcome = self
            .processors
            .stage(&command, &self.state, &mut side_effects)
            .await;
        let deferred = side_effects.take_deferred();

        match outcome {
            StageOutcome::RetryLater => {
                debug!(
                    "Side effects of command at {} failed, retrying in {:?}",
                    command.position, self.config.processing.retry_delay
                );
                self.retrying = Some((command, responder));
                self.retry_at = Some(Instant::now() + self.config.processing.retry_delay);
                Ok(())
            }
            StageOutcome::Fatal(processing_error) => {
                error!(
                    "Failed to process {:?} {:?} at {}: {}",
                    command.value_type, command.intent, command.position, processing_error
                );

                let mut writer = RecordWriter::new(&command);
                writer.append_rejection(Rejection::new(
                    RejectionType::ProcessingError,
                    processing_error.to_string(),
                ));
                let (mut records, _) = writer.into_parts();
                if let Err(e) = self.append(&mut records).await {
                    responder.unavailable(self.partition_id);
                    return Err(e);
                }

                self.listeners.processed(&command, &records);
                responder.processing_failed(processing_error);
                Ok(())
            }
            StageOutcome::Staged { decision, writer } => {
                let (mut records, response) = writer.into_parts();
                if let Err(e) = self.append(&mut records).await {
                    responder.unavailable(self.partition_id);
                    return Err(e);
                }

                if decision.is_accepted() {
                    if let Err(e) = self.processors.update_state(&command, &mut self.state) {
                        error!(
                            "Failed to apply command at {} to state: {}",
                            command.position, e
                        );
                    }
                }

                self.listeners.processed(&command, &records);
                self.respond(responder, response, deferred);
                Ok(())
            }
        }
    }

    fn respond(
        &self,
        responder: Responder,
        response: Option<CommandResponse>,
        deferred: Option<CompletionHandle>,
    ) {
        match deferred {
            None => responder.respond(response),
            Some(handle) => {
                self.responders.spawn(async move {
                    match handle.await {
                        Ok(()) => responder.respond(response),
                        Err(e) => responder.distribution_failed(e),
                    }
                });
            }
        }
    }

    async fn retry(&mut self) -> EngineResult<()> {
        self.retry_at = None;
        if let Some((command, responder)) = self.retrying.take() {
            debug!("Retrying command at {}", command.position);
            self.process(command, responder).await?;
        }
        self.drain_backlog().await
    }

    /// Process held back work until it is done or another retry is needed
    async fn drain_backlog(&mut self) -> EngineResult<()> {
        while self.retrying.is_none() {
            let Some(queued) = self.backlog.pop_front() else {
                break;
            };
            match queued {
                Queued::Message(message) => self.handle_message(message).await?,
                Queued::Appended(command, responder) => self.process(command, responder).await?,
            }
        }
        Ok(())
    }

    /// Assign positions and append `records` to the log
    async fn append(&mut self, records: &mut [Record]) -> EngineResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(records.len());
        for (offset, record) in records.iter_mut().enumerate() {
            record.position = self.next_position + offset as u64;
            entries.push((record.position, record.encode()?));
        }

        self.log.append(&self.namespace, entries).await?;
        self.next_position += records.len() as u64;
        Ok(())
    }

    async fn stop(&mut self, shutdown: Option<oneshot::Sender<()>>) {
        // Refuse everything that will never be processed
        if let Some((_, responder)) = self.retrying.take() {
            responder.unavailable(self.partition_id);
        }
        for queued in std::mem::take(&mut self.backlog) {
            match queued {
                Queued::Message(message) => self.refuse(message),
                Queued::Appended(_, responder) => responder.unavailable(self.partition_id),
            }
        }
        while let Ok(message) = self.mailbox.try_recv() {
            self.refuse(message);
        }

        self.coordinator.shutdown().await;
        self.responders.close();
        self.responders.wait().await;

        info!("{} stopped", self.partition_id);
        if let Some(reply) = shutdown {
            let _ = reply.send(());
        }
    }

    fn refuse(&self, message: PartitionMessage) {
        match message {
            PartitionMessage::Submit { reply, .. } => {
                Responder::Client(reply).unavailable(self.partition_id)
            }
            PartitionMessage::Push { request, reply } => Responder::Push {
                distribution_key: request.distribution_key,
                partition_id: self.partition_id,
                reply,
            }
            .unavailable(self.partition_id),
            PartitionMessage::DiscardDistribution { reply, .. }
            | PartitionMessage::PendingDistribution { reply, .. } => {
                let _ = reply.send(Err(Error::not_leader(self.partition_id, None)));
            }
            PartitionMessage::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}
