//! Processors creating resources and distributing them to every partition
//!
//! Each [`DistributedResource`] gets two processors:
//! - [`CreateProcessor`] handles `Create` on the partition the client talked to
//! - [`DistributeProcessor`] handles `Distribute` on every other partition

mod create;
mod deployment;
mod distribute;
mod resource;
mod topic;

pub use create::CreateProcessor;
pub use deployment::Deployment;
pub use distribute::DistributeProcessor;
pub use resource::DistributedResource;
pub use topic::Topic;

use crate::error::EngineResult;
use crate::pipeline::RecordProcessors;
use crate::record::Intent;

/// Processors every partition runs
pub fn default_processors() -> EngineResult<RecordProcessors> {
    let mut processors = RecordProcessors::new();
    register_resource::<Topic>(&mut processors)?;
    register_resource::<Deployment>(&mut processors)?;
    Ok(processors)
}

/// Register the create and distribute processors of `R`
pub fn register_resource<R: DistributedResource>(
    processors: &mut RecordProcessors,
) -> EngineResult<()> {
    processors.register(R::VALUE_TYPE, Intent::Create, CreateProcessor::<R>::new())?;
    processors.register(
        R::VALUE_TYPE,
        Intent::Distribute,
        DistributeProcessor::<R>::new(),
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use meridian_topology::PartitionId;

    use crate::distribution::{CompletionHandle, DistributionError, Distributor};
    use crate::pipeline::{
        Decision, ProcessingListener, ProcessingListeners, RecordProcessor, RecordWriter,
        SideEffects,
    };
    use crate::partition::PartitionState;
    use crate::record::{Intent, Record, ValueType, encode_value};

    /// Remembers every distribution and answers with a fixed result
    pub(crate) struct RecordingDistributor {
        pub(crate) calls: Vec<(u64, u64, Bytes)>,
        pub(crate) fail_with: Option<DistributionError>,
    }

    impl RecordingDistributor {
        pub(crate) fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl Distributor for RecordingDistributor {
        async fn distribute(
            &mut self,
            distribution_key: u64,
            source_position: u64,
            payload: Bytes,
        ) -> Result<CompletionHandle, DistributionError> {
            self.calls.push((distribution_key, source_position, payload));
            match &self.fail_with {
                Some(error) => Err(error.clone()),
                None => Ok(CompletionHandle::ready(distribution_key, Ok(()))),
            }
        }
    }

    /// Remembers applied resources
    #[derive(Default)]
    pub(crate) struct AppliedListener {
        pub(crate) applied: Mutex<Vec<(ValueType, String, u64)>>,
    }

    impl ProcessingListener for AppliedListener {
        fn on_resource_applied(&self, value_type: ValueType, name: &str, key: u64) {
            self.applied
                .lock()
                .unwrap()
                .push((value_type, name.to_string(), key));
        }
    }

    pub(crate) fn command<T: serde::Serialize>(intent: Intent, value_type: ValueType, value: &T) -> Record {
        let mut command = Record::command(
            PartitionId::new(1),
            value_type,
            intent,
            encode_value(value).unwrap(),
        );
        command.key = 77;
        command.position = 3;
        command
    }

    /// Runs all four phases the way a partition does for a live command
    pub(crate) async fn run(
        processor: &dyn RecordProcessor,
        command: &Record,
        state: &mut PartitionState,
        distributor: &mut RecordingDistributor,
        listener: Arc<AppliedListener>,
    ) -> (Decision, RecordWriter, Option<CompletionHandle>) {
        let mut listeners = ProcessingListeners::new();
        listeners.add(listener);

        let decision = processor.process_record(command, state).unwrap();
        let mut side_effects = SideEffects::new(distributor, &listeners);
        assert!(
            processor
                .execute_side_effects(command, &decision, &mut side_effects)
                .await
        );
        let deferred = side_effects.take_deferred();

        let mut writer = RecordWriter::new(command);
        processor.write_record(command, &decision, &mut writer);
        if decision.is_accepted() {
            processor.update_state(command, state).unwrap();
        }

        (decision, writer, deferred)
    }
}
