//! Four-phase record processing
//!
//! Every command is handled by the processor registered for its
//! `(ValueType, Intent)` in four phases:
//!
//! 1. [`RecordProcessor::process_record`] decides accept or reject
//! 2. [`RecordProcessor::execute_side_effects`] touches the outside world
//! 3. [`RecordProcessor::write_record`] produces the follow-up records
//! 4. [`RecordProcessor::update_state`] applies an accepted command
//!
//! Phases 1, 3 and 4 must be deterministic in the command and the state.
//! Replaying the log only runs phases 1 and 4.

mod listener;
mod processor;
mod registry;
mod writer;

pub use listener::{BroadcastListener, ListenerEvent, ProcessingListener, ProcessingListeners};
pub use processor::{RecordProcessor, SideEffects};
pub use registry::RecordProcessors;
pub(crate) use registry::StageOutcome;
pub use writer::{CommandResponse, RecordWriter};

use thiserror::Error;

use crate::record::{Intent, Rejection, ValueType};

/// Outcome of phase 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The command is applied
    Accept,
    /// The command is refused and state stays untouched
    Reject(Rejection),
}

impl Decision {
    /// Whether the command was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// A command that cannot be processed at all
///
/// Unlike a rejection this is not a business decision; the command is
/// answered with an error and processing continues with the next record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    /// The payload could not be decoded
    #[error("malformed {value_type:?} payload: {reason}")]
    MalformedPayload {
        /// Value type the payload claimed to be
        value_type: ValueType,
        /// Decoding failure
        reason: String,
    },

    /// Nothing handles this kind of command
    #[error("no processor registered for {value_type:?} {intent:?}")]
    NoProcessor {
        /// Value type of the command
        value_type: ValueType,
        /// Intent of the command
        intent: Intent,
    },

    /// State is inconsistent with the command
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}
