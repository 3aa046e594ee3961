//! The processor contract

use async_trait::async_trait;

use super::{CommandResponse, Decision, ProcessingError, ProcessingListeners, RecordWriter};
use crate::distribution::{CompletionHandle, Distributor};
use crate::partition::PartitionState;
use crate::record::Record;

/// What phase 2 may touch
pub struct SideEffects<'a> {
    distributor: &'a mut dyn Distributor,
    listeners: &'a ProcessingListeners,
    deferred: Option<CompletionHandle>,
}

impl<'a> SideEffects<'a> {
    pub(crate) fn new(
        distributor: &'a mut dyn Distributor,
        listeners: &'a ProcessingListeners,
    ) -> Self {
        Self {
            distributor,
            listeners,
            deferred: None,
        }
    }

    /// Distribution of commands to the other partitions
    pub fn distributor(&mut self) -> &mut dyn Distributor {
        &mut *self.distributor
    }

    /// Listeners registered on the partition
    pub fn listeners(&self) -> &ProcessingListeners {
        self.listeners
    }

    /// Hold the response back until `handle` resolves
    pub fn defer_response(&mut self, handle: CompletionHandle) {
        self.deferred = Some(handle);
    }

    pub(crate) fn take_deferred(&mut self) -> Option<CompletionHandle> {
        self.deferred.take()
    }
}

/// Handles one `(ValueType, Intent)` pair
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    /// Phase 1: accept or reject without mutating anything
    fn process_record(
        &self,
        command: &Record,
        state: &PartitionState,
    ) -> Result<Decision, ProcessingError>;

    /// Phase 2: returns `false` if the record must be processed again later
    ///
    /// Never runs on replay.
    async fn execute_side_effects(
        &self,
        _command: &Record,
        _decision: &Decision,
        _side_effects: &mut SideEffects<'_>,
    ) -> bool {
        true
    }

    /// Phase 3: the default writes and answers a rejection
    fn write_record(&self, _command: &Record, decision: &Decision, writer: &mut RecordWriter) {
        if let Decision::Reject(rejection) = decision {
            writer.append_rejection(rejection.clone());
            writer.respond(CommandResponse::Rejected(rejection.clone()));
        }
    }

    /// Phase 4: only called for accepted commands
    fn update_state(
        &self,
        command: &Record,
        state: &mut PartitionState,
    ) -> Result<(), ProcessingError>;
}
