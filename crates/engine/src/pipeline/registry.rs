//! Processors of a partition, keyed by what they handle

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::{Decision, ProcessingError, RecordProcessor, RecordWriter, SideEffects};
use crate::engine_error;
use crate::error::{EngineResult, ErrorKind};
use crate::partition::PartitionState;
use crate::record::{Intent, Record, ValueType};

/// Result of running phases 1 to 3 on a live command
pub(crate) enum StageOutcome {
    /// Ready to be written; phase 4 follows once the records are appended
    Staged {
        decision: Decision,
        writer: RecordWriter,
    },
    /// Side effects failed; the command must be processed again
    RetryLater,
    /// The command cannot be processed
    Fatal(ProcessingError),
}

/// Registry of record processors
#[derive(Default)]
pub struct RecordProcessors {
    processors: HashMap<(ValueType, Intent), Box<dyn RecordProcessor>>,
}

impl RecordProcessors {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` for commands of `value_type` with `intent`
    pub fn register(
        &mut self,
        value_type: ValueType,
        intent: Intent,
        processor: impl RecordProcessor + 'static,
    ) -> EngineResult<()> {
        if self.processors.contains_key(&(value_type, intent)) {
            return Err(engine_error!(
                ErrorKind::Configuration,
                "a processor for {:?} {:?} is already registered",
                value_type,
                intent
            ));
        }

        self.processors
            .insert((value_type, intent), Box::new(processor));
        Ok(())
    }

    /// Whether a processor handles commands of `value_type` with `intent`
    pub fn is_registered(&self, value_type: ValueType, intent: Intent) -> bool {
        self.processors.contains_key(&(value_type, intent))
    }

    fn get(&self, command: &Record) -> Result<&dyn RecordProcessor, ProcessingError> {
        self.processors
            .get(&(command.value_type, command.intent))
            .map(|processor| processor.as_ref())
            .ok_or(ProcessingError::NoProcessor {
                value_type: command.value_type,
                intent: command.intent,
            })
    }

    /// Phases 1 to 3
    pub(crate) async fn stage(
        &self,
        command: &Record,
        state: &PartitionState,
        side_effects: &mut SideEffects<'_>,
    ) -> StageOutcome {
        let processor = match self.get(command) {
            Ok(processor) => processor,
            Err(e) => return StageOutcome::Fatal(e),
        };

        let decision = match processor.process_record(command, state) {
            Ok(decision) => decision,
            Err(e) => return StageOutcome::Fatal(e),
        };
        debug!(
            "{:?} {:?} at {}: {:?}",
            command.value_type, command.intent, command.position, decision
        );

        if !processor
            .execute_side_effects(command, &decision, side_effects)
            .await
        {
            return StageOutcome::RetryLater;
        }

        let mut writer = RecordWriter::new(command);
        processor.write_record(command, &decision, &mut writer);

        StageOutcome::Staged { decision, writer }
    }

    /// Phase 4
    pub(crate) fn update_state(
        &self,
        command: &Record,
        state: &mut PartitionState,
    ) -> Result<(), ProcessingError> {
        self.get(command)?.update_state(command, state)
    }

    /// Phases 1 and 4, for commands whose follow-ups are already in the log
    pub(crate) fn replay(
        &self,
        command: &Record,
        state: &mut PartitionState,
    ) -> Result<Decision, ProcessingError> {
        let processor = self.get(command)?;
        let decision = processor.process_record(command, state)?;
        if decision.is_accepted() {
            processor.update_state(command, state)?;
        }
        Ok(decision)
    }
}

impl fmt::Debug for RecordProcessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.processors.keys().collect();
        registered.sort();
        f.debug_struct("RecordProcessors")
            .field("registered", &registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{CompletionHandle, DistributionError, Distributor};
    use crate::pipeline::{CommandResponse, ProcessingListeners};
    use crate::record::{RecordType, Rejection};
    use async_trait::async_trait;
    use bytes::Bytes;
    use meridian_topology::PartitionId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Unreachable;

    #[async_trait]
    impl Distributor for Unreachable {
        async fn distribute(
            &mut self,
            distribution_key: u64,
            _source_position: u64,
            _payload: Bytes,
        ) -> Result<CompletionHandle, DistributionError> {
            Err(DistributionError::Shutdown {
                key: distribution_key,
            })
        }
    }

    /// Accepts payloads other than "bad", fails side effects a set number of times
    #[derive(Default)]
    struct Counting {
        side_effect_failures: AtomicUsize,
        updates: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecordProcessor for Counting {
        fn process_record(
            &self,
            command: &Record,
            _state: &PartitionState,
        ) -> Result<Decision, ProcessingError> {
            if command.payload.as_ref() == b"bad" {
                Ok(Decision::Reject(Rejection::invalid_argument("bad value")))
            } else {
                Ok(Decision::Accept)
            }
        }

        async fn execute_side_effects(
            &self,
            _command: &Record,
            _decision: &Decision,
            _side_effects: &mut SideEffects<'_>,
        ) -> bool {
            self.side_effect_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        fn write_record(&self, command: &Record, decision: &Decision, writer: &mut RecordWriter) {
            match decision {
                Decision::Accept => {
                    writer.append_event(command.value_type, Intent::Created, command.payload.clone());
                    writer.respond(CommandResponse::Accepted { key: command.key });
                }
                Decision::Reject(rejection) => {
                    writer.append_rejection(rejection.clone());
                    writer.respond(CommandResponse::Rejected(rejection.clone()));
                }
            }
        }

        fn update_state(
            &self,
            _command: &Record,
            _state: &mut PartitionState,
        ) -> Result<(), ProcessingError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn command(payload: &'static [u8]) -> Record {
        Record::command(
            PartitionId::new(1),
            ValueType::Topic,
            Intent::Create,
            Bytes::from_static(payload),
        )
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut processors = RecordProcessors::new();
        processors
            .register(ValueType::Topic, Intent::Create, Counting::default())
            .unwrap();

        let err = processors
            .register(ValueType::Topic, Intent::Create, Counting::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(processors.is_registered(ValueType::Topic, Intent::Create));
        assert!(!processors.is_registered(ValueType::Topic, Intent::Distribute));
    }

    #[tokio::test]
    async fn test_stage_runs_phases_in_order() {
        let mut processors = RecordProcessors::new();
        processors
            .register(ValueType::Topic, Intent::Create, Counting::default())
            .unwrap();
        let state = PartitionState::default();
        let listeners = ProcessingListeners::new();
        let mut distributor = Unreachable;
        let mut side_effects = SideEffects::new(&mut distributor, &listeners);

        let outcome = processors
            .stage(&command(b"good"), &state, &mut side_effects)
            .await;
        let StageOutcome::Staged { decision, writer } = outcome else {
            panic!("command was not staged");
        };
        assert_eq!(decision, Decision::Accept);
        assert_eq!(writer.records()[0].record_type, RecordType::Event);

        let outcome = processors
            .stage(&command(b"bad"), &state, &mut side_effects)
            .await;
        let StageOutcome::Staged { decision, writer } = outcome else {
            panic!("command was not staged");
        };
        assert!(!decision.is_accepted());
        let (records, response) = writer.into_parts();
        assert_eq!(records[0].record_type, RecordType::CommandRejection);
        assert!(matches!(response, Some(CommandResponse::Rejected(_))));
    }

    #[tokio::test]
    async fn test_failed_side_effects_retry_and_unknown_commands_are_fatal() {
        let mut processors = RecordProcessors::new();
        processors
            .register(
                ValueType::Topic,
                Intent::Create,
                Counting {
                    side_effect_failures: AtomicUsize::new(1),
                    ..Counting::default()
                },
            )
            .unwrap();
        let state = PartitionState::default();
        let listeners = ProcessingListeners::new();
        let mut distributor = Unreachable;
        let mut side_effects = SideEffects::new(&mut distributor, &listeners);

        let first = processors
            .stage(&command(b"good"), &state, &mut side_effects)
            .await;
        assert!(matches!(first, StageOutcome::RetryLater));
        let second = processors
            .stage(&command(b"good"), &state, &mut side_effects)
            .await;
        assert!(matches!(second, StageOutcome::Staged { .. }));

        let mut unknown = command(b"good");
        unknown.intent = Intent::Distribute;
        let outcome = processors.stage(&unknown, &state, &mut side_effects).await;
        assert!(matches!(
            outcome,
            StageOutcome::Fatal(ProcessingError::NoProcessor {
                intent: Intent::Distribute,
                ..
            })
        ));
    }

    #[test]
    fn test_replay_only_updates_accepted_commands() {
        let updates = Arc::new(AtomicUsize::new(0));
        let mut processors = RecordProcessors::new();
        processors
            .register(
                ValueType::Topic,
                Intent::Create,
                Counting {
                    updates: updates.clone(),
                    ..Counting::default()
                },
            )
            .unwrap();
        let mut state = PartitionState::default();

        processors.replay(&command(b"good"), &mut state).unwrap();
        processors.replay(&command(b"bad"), &mut state).unwrap();

        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }
}
