use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::{error, warn};

use super::DistributedResource;
use super::resource::{apply_resource, decode_resource};
use crate::distribution::{CompletionHandle, DistributionError};
use crate::partition::PartitionState;
use crate::pipeline::{
    CommandResponse, Decision, ProcessingError, RecordProcessor, RecordWriter, SideEffects,
};
use crate::record::{DistributedCommand, Intent, Record, Rejection};

/// Creates a resource on the partition that received the client command
///
/// Accepted resources are distributed to every other partition; the client
/// is answered once all of them acknowledged.
pub struct CreateProcessor<R> {
    _resource: PhantomData<fn() -> R>,
}

impl<R: DistributedResource> CreateProcessor<R> {
    /// Create the processor
    pub fn new() -> Self {
        Self {
            _resource: PhantomData,
        }
    }
}

impl<R: DistributedResource> Default for CreateProcessor<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: DistributedResource> RecordProcessor for CreateProcessor<R> {
    fn process_record(
        &self,
        command: &Record,
        state: &PartitionState,
    ) -> Result<Decision, ProcessingError> {
        let resource: R = decode_resource(command)?;

        if let Err(reason) = resource.validate() {
            return Ok(Decision::Reject(Rejection::invalid_argument(format!(
                "Expected to create {} '{}' but {}",
                R::KIND,
                resource.name(),
                reason
            ))));
        }

        if R::registered_key(state, resource.name()).is_some() {
            return Ok(Decision::Reject(Rejection::already_exists(format!(
                "Expected to create {} '{}' but it already exists",
                R::KIND,
                resource.name()
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
        if !decision.is_accepted() {
            return true;
        }

        let distributed = DistributedCommand {
            value_type: R::VALUE_TYPE,
            intent: Intent::Distribute,
            value: command.payload.clone(),
        };
        let payload = match distributed.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {} {}: {}", R::KIND, command.key, e);
                let failed = DistributionError::Encode {
                    key: command.key,
                    reason: e.to_string(),
                };
                side_effects.defer_response(CompletionHandle::ready(command.key, Err(failed)));
                return true;
            }
        };

        match side_effects
            .distributor()
            .distribute(command.key, command.position, payload)
            .await
        {
            Ok(handle) => {
                side_effects.defer_response(handle);
                true
            }
            Err(e) if e.is_transient() => {
                warn!("Could not start distributing {} {}: {}", R::KIND, command.key, e);
                false
            }
            Err(e) => {
                error!("Not distributing {} {}: {}", R::KIND, command.key, e);
                side_effects.defer_response(CompletionHandle::ready(command.key, Err(e)));
                true
            }
        }
    }

    fn write_record(&self, command: &Record, decision: &Decision, writer: &mut RecordWriter) {
        match decision {
            Decision::Accept => {
                writer.append_event(R::VALUE_TYPE, Intent::Created, command.payload.clone());
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
        command: &Record,
        state: &mut PartitionState,
    ) -> Result<(), ProcessingError> {
        apply_resource::<R>(command, state)
    }
}
