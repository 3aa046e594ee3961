//! Observers of processed records

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::record::{Record, ValueType};

/// Observes a partition's processing; every method defaults to doing nothing
pub trait ProcessingListener: Send + Sync {
    /// A command was processed live and its follow-ups were written
    fn on_processed(&self, _command: &Record, _follow_ups: &[Record]) {}

    /// A record was not dispatched to any processor
    fn on_skipped(&self, _record: &Record) {}

    /// A distributed resource was applied on this partition for the first time
    fn on_resource_applied(&self, _value_type: ValueType, _name: &str, _key: u64) {}
}

/// The listeners of one partition
#[derive(Clone, Default)]
pub struct ProcessingListeners {
    listeners: Vec<Arc<dyn ProcessingListener>>,
}

impl ProcessingListeners {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add(&mut self, listener: Arc<dyn ProcessingListener>) {
        self.listeners.push(listener);
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn processed(&self, command: &Record, follow_ups: &[Record]) {
        for listener in &self.listeners {
            listener.on_processed(command, follow_ups);
        }
    }

    pub(crate) fn skipped(&self, record: &Record) {
        for listener in &self.listeners {
            listener.on_skipped(record);
        }
    }

    /// Notify every listener that a resource was applied
    pub fn resource_applied(&self, value_type: ValueType, name: &str, key: u64) {
        for listener in &self.listeners {
            listener.on_resource_applied(value_type, name, key);
        }
    }
}

impl fmt::Debug for ProcessingListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// A listener callback, as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// See [`ProcessingListener::on_processed`]
    Processed {
        /// Processed command
        command: Record,
        /// Records written for it
        follow_ups: Vec<Record>,
    },
    /// See [`ProcessingListener::on_skipped`]
    Skipped {
        /// Skipped record
        record: Record,
    },
    /// See [`ProcessingListener::on_resource_applied`]
    ResourceApplied {
        /// Kind of resource
        value_type: ValueType,
        /// Resource name
        name: String,
        /// Key of the distributing command
        key: u64,
    },
}

/// Republishes listener callbacks on a broadcast channel
///
/// Slow subscribers lose the oldest events rather than slowing the partition.
#[derive(Debug, Clone)]
pub struct BroadcastListener {
    sender: broadcast::Sender<ListenerEvent>,
}

impl BroadcastListener {
    /// Create a listener buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: ListenerEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl ProcessingListener for BroadcastListener {
    fn on_processed(&self, command: &Record, follow_ups: &[Record]) {
        self.publish(ListenerEvent::Processed {
            command: command.clone(),
            follow_ups: follow_ups.to_vec(),
        });
    }

    fn on_skipped(&self, record: &Record) {
        self.publish(ListenerEvent::Skipped {
            record: record.clone(),
        });
    }

    fn on_resource_applied(&self, value_type: ValueType, name: &str, key: u64) {
        self.publish(ListenerEvent::ResourceApplied {
            value_type,
            name: name.to_string(),
            key,
        });
    }
}
