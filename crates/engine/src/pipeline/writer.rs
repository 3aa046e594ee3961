//! Follow-up records and responses produced in phase 3

use bytes::Bytes;

use crate::record::{Intent, Record, RecordType, Rejection, ValueType};

/// Answer to the requester of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    /// The command was applied
    Accepted {
        /// Key of the affected entity
        key: u64,
    },
    /// The desired state already held
    AlreadyApplied {
        /// Key of the affected entity
        key: u64,
    },
    /// The command was refused
    Rejected(Rejection),
}

impl CommandResponse {
    /// Whether the requester's desired state now holds
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Collects the records written for one command
///
/// Positions are left unset; they are assigned when the records are appended.
#[derive(Debug)]
pub struct RecordWriter {
    key: u64,
    command: Record,
    records: Vec<Record>,
    response: Option<CommandResponse>,
}

impl RecordWriter {
    pub(crate) fn new(command: &Record) -> Self {
        Self {
            key: command.key,
            command: command.clone(),
            records: Vec::new(),
            response: None,
        }
    }

    /// Append an event following up the command
    pub fn append_event(&mut self, value_type: ValueType, intent: Intent, payload: Bytes) {
        self.records.push(Record {
            key: self.key,
            partition_id: self.command.partition_id,
            position: 0,
            record_type: RecordType::Event,
            value_type,
            intent,
            rejection: None,
            source_record_position: Some(self.command.position),
            payload,
        });
    }

    /// Append a rejection of the command
    pub fn append_rejection(&mut self, rejection: Rejection) {
        self.records.push(Record {
            record_type: RecordType::CommandRejection,
            rejection: Some(rejection),
            position: 0,
            source_record_position: Some(self.command.position),
            ..self.command.clone()
        });
    }

    /// Set the answer for the requester
    pub fn respond(&mut self, response: CommandResponse) {
        self.response = Some(response);
    }

    /// Records appended so far
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn into_parts(self) -> (Vec<Record>, Option<CommandResponse>) {
        (self.records, self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RejectionType;
    use meridian_topology::PartitionId;

    fn command() -> Record {
        let mut command = Record::command(
            PartitionId::new(2),
            ValueType::Topic,
            Intent::Create,
            Bytes::from_static(b"value"),
        );
        command.key = 11;
        command.position = 5;
        command
    }

    #[test]
    fn test_follow_ups_reference_the_command() {
        let mut writer = RecordWriter::new(&command());
        writer.append_event(ValueType::Topic, Intent::Created, Bytes::from_static(b"value"));
        writer.respond(CommandResponse::Accepted { key: 11 });

        let (records, response) = writer.into_parts();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::Event);
        assert_eq!(records[0].key, 11);
        assert_eq!(records[0].source_record_position, Some(5));
        assert_eq!(response, Some(CommandResponse::Accepted { key: 11 }));
    }

    #[test]
    fn test_rejection_keeps_command_value() {
        let mut writer = RecordWriter::new(&command());
        writer.append_rejection(Rejection::already_exists("topic exists"));

        let record = &writer.records()[0];
        assert_eq!(record.record_type, RecordType::CommandRejection);
        assert_eq!(record.intent, Intent::Create);
        assert_eq!(record.payload, Bytes::from_static(b"value"));
        assert_eq!(
            record.rejection.as_ref().map(|r| r.rejection_type),
            Some(RejectionType::AlreadyExists)
        );
        assert_eq!(record.position, 0);
    }
}
