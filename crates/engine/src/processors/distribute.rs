use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::debug;

use super::DistributedResource;
use super::resource::{apply_resource, decode_resource};
use crate::partition::PartitionState;
use crate::pipeline::{
    CommandResponse, Decision, ProcessingError, RecordProcessor, RecordWriter, SideEffects,
};
use crate::record::{Intent, Record, Rejection, RejectionType};

/// Applies a resource distributed from another partition
///
/// Redelivery is expected: a resource already registered under the same key
/// is rejected as a duplicate but acknowledged as applied. A different
/// resource holding the name is a conflict the sender cannot retry past.
pub struct DistributeProcessor<R> {
    _resource: PhantomData<fn() -> R>,
}

impl<R: DistributedResource> DistributeProcessor<R> {
    /// Create the processor
    pub fn new() -> Self {
        Self {
            _resource: PhantomData,
        }
    }
}

impl<R: DistributedResource> Default for DistributeProcessor<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: DistributedResource> RecordProcessor for DistributeProcessor<R> {
    fn process_record(
        &self,
        command: &Record,
        state: &PartitionState,
    ) -> Result<Decision, ProcessingError> {
        let resource: R = decode_resource(command)?;

        match R::registered_key(state, resource.name()) {
            Some(key) if key == command.key => {
                return Ok(Decision::Reject(Rejection::already_exists(format!(
                    "{} '{}' was already distributed",
                    R::KIND,
                    resource.name()
                ))));
            }
            Some(key) => {
                return Ok(Decision::Reject(Rejection::invalid_state(format!(
                    "Expected to apply {} '{}' with key {} but it is registered with key {}",
                    R::KIND,
                    resource.name(),
                    command.key,
                    key
                ))));
            }
            None => {}
        }

        if let Err(reason) = resource.validate() {
            return Ok(Decision::Reject(Rejection::invalid_argument(format!(
                "Expected to apply {} '{}' but {}",
                R::KIND,
                resource.name(),
                reason
            ))));
        }

        Ok(Decision::Accept)
    }

    async fn execute_side_effects(
        &self,
        command: &Record,
        decision: &Decision,
        side_effects: &mut SideEffects<'_>,
    ) -> bool {
        if decision.is_accepted() {
            if let Ok(resource) = decode_resource::<R>(command) {
                side_effects
                    .listeners()
                    .resource_applied(R::VALUE_TYPE, resource.name(), command.key);
            }
        }
        true
    }

    fn write_record(&self, command: &Record, decision: &Decision, writer: &mut RecordWriter) {
        match decision {
            Decision::Accept => {
                writer.append_event(R::VALUE_TYPE, Intent::Distributed, command.payload.clone());
                writer.respond(CommandResponse::Accepted { key: command.key });
            }
            Decision::Reject(rejection) => {
                writer.append_rejection(rejection.clone());
                if rejection.rejection_type == RejectionType::AlreadyExists {
                    debug!("{} {} already applied", R::KIND, command.key);
                    writer.respond(CommandResponse::AlreadyApplied { key: command.key });
                } else {
                    writer.respond(CommandResponse::Rejected(rejection.clone()));
                }
            }
        }
    }

    fn update_state(
        &self,
        command: &Record,
        state: &mut PartitionState,
    ) -> Result<(), ProcessingError> {
        apply_resource::<R>(command, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::{AppliedListener, RecordingDistributor, command, run};
    use crate::processors::{Deployment, Topic};
    use crate::record::{RecordType, ValueType};
    use bytes::Bytes;
    use std::sync::Arc;

    fn deployment() -> Deployment {
        Deployment {
            resource_name: "order-process.bpmn".to_string(),
            resource: Bytes::from_static(b"<definitions/>"),
        }
    }

    #[tokio::test]
    async fn test_redelivery_is_acknowledged_without_second_application() {
        let processor = DistributeProcessor::<Deployment>::new();
        let mut state = PartitionState::default();
        let mut distributor = RecordingDistributor::new();
        let listener = Arc::new(AppliedListener::default());
        let push = command(Intent::Distribute, ValueType::Deployment, &deployment());

        let (first, writer, _) = run(
            &processor,
            &push,
            &mut state,
            &mut distributor,
            listener.clone(),
        )
        .await;
        assert_eq!(first, Decision::Accept);
        let (records, response) = writer.into_parts();
        assert_eq!(records[0].intent, Intent::Distributed);
        assert_eq!(response, Some(CommandResponse::Accepted { key: 77 }));

        let (second, writer, _) = run(
            &processor,
            &push,
            &mut state,
            &mut distributor,
            listener.clone(),
        )
        .await;
        assert!(!second.is_accepted());
        let (records, response) = writer.into_parts();
        assert_eq!(records[0].record_type, RecordType::CommandRejection);
        assert_eq!(response, Some(CommandResponse::AlreadyApplied { key: 77 }));

        assert_eq!(state.deployments().count(), 1);
        assert_eq!(
            *listener.applied.lock().unwrap(),
            vec![(ValueType::Deployment, "order-process.bpmn".to_string(), 77)]
        );
        assert!(distributor.calls.is_empty());
    }

    #[tokio::test]
    async fn test_same_name_under_another_key_is_a_conflict() {
        let processor = DistributeProcessor::<Topic>::new();
        let mut state = PartitionState::default();
        let existing = Topic {
            name: "orders".to_string(),
            partition_count: 1,
            replication_factor: 1,
        };
        assert!(state.insert_topic(5, existing.clone()));
        let listener = Arc::new(AppliedListener::default());
        let other = Topic {
            name: "orders".to_string(),
            partition_count: 9,
            replication_factor: 1,
        };
        let push = command(Intent::Distribute, ValueType::Topic, &other);

        let (decision, writer, _) = run(
            &processor,
            &push,
            &mut state,
            &mut RecordingDistributor::new(),
            listener.clone(),
        )
        .await;

        assert!(!decision.is_accepted());
        let (records, response) = writer.into_parts();
        assert_eq!(records[0].record_type, RecordType::CommandRejection);
        assert!(matches!(
            response,
            Some(CommandResponse::Rejected(Rejection {
                rejection_type: RejectionType::InvalidState,
                ..
            }))
        ));

        let registered = state.topic("orders").unwrap();
        assert_eq!(registered.key, 5);
        assert_eq!(registered.value, existing);
        assert!(listener.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_value_is_answered_with_rejection() {
        let processor = DistributeProcessor::<Topic>::new();
        let mut state = PartitionState::default();
        let invalid = Topic {
            name: "orders".to_string(),
            partition_count: 1,
            replication_factor: 0,
        };
        let push = command(Intent::Distribute, ValueType::Topic, &invalid);

        let (decision, writer, _) = run(
            &processor,
            &push,
            &mut state,
            &mut RecordingDistributor::new(),
            Arc::new(AppliedListener::default()),
        )
        .await;

        assert!(!decision.is_accepted());
        let (_, response) = writer.into_parts();
        assert!(matches!(
            response,
            Some(CommandResponse::Rejected(Rejection {
                rejection_type: RejectionType::InvalidArgument,
                ..
            }))
        ));
        assert!(state.topic("orders").is_none());
    }
}
