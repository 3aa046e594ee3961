//! Engine configuration

use meridian_topology::PartitionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine_error;
use crate::error::{EngineResult, ErrorKind};

/// Engine configuration
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cross-partition distribution
    pub distribution: DistributionConfig,

    /// Record processing
    pub processing: ProcessingConfig,

    /// Partition actors
    pub partition: PartitionConfig,
}

/// Distribution coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// How long to wait for a push acknowledgement
    pub request_timeout: Duration,

    /// Delay before retrying a target whose leader is unknown or whose push failed
    pub retry_delay: Duration,

    /// Partitions that never receive distributed commands
    pub excluded_partitions: Vec<PartitionId>,
}

/// Record processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Delay before a record whose side effects failed is processed again
    pub retry_delay: Duration,
}

/// Partition actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Capacity of each partition's mailbox
    pub mailbox_capacity: usize,

    /// Capacity of the listener event channel returned by `subscribe`
    pub event_capacity: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            retry_delay: Duration::from_millis(100),
            excluded_partitions: Vec::new(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> EngineResult<()> {
        let distribution = &self.distribution;

        if distribution.retry_delay.is_zero() {
            return Err(engine_error!(
                ErrorKind::Configuration,
                "distribution.retry_delay must be greater than zero"
            ));
        }

        if distribution.request_timeout <= distribution.retry_delay {
            return Err(engine_error!(
                ErrorKind::Configuration,
                "distribution.request_timeout ({:?}) must be greater than distribution.retry_delay ({:?})",
                distribution.request_timeout,
                distribution.retry_delay
            ));
        }

        if self.processing.retry_delay.is_zero() {
            return Err(engine_error!(
                ErrorKind::Configuration,
                "processing.retry_delay must be greater than zero"
            ));
        }

        if self.partition.mailbox_capacity == 0 || self.partition.event_capacity == 0 {
            return Err(engine_error!(
                ErrorKind::Configuration,
                "partition channel capacities must be greater than zero"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.distribution.request_timeout, Duration::from_secs(15));
        assert_eq!(config.distribution.retry_delay, Duration::from_millis(100));
        assert_eq!(config.processing.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_request_timeout_must_exceed_retry_delay() {
        let mut config = EngineConfig::default();
        config.distribution.request_timeout = Duration::from_millis(100);

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_zero_delays_are_rejected() {
        let mut config = EngineConfig::default();
        config.processing.retry_delay = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.distribution.retry_delay = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let mut config = EngineConfig::default();
        config.distribution.excluded_partitions = vec![PartitionId::new(1)];

        let json = serde_json::to_string(&config).unwrap();
        let decoded: EngineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            decoded.distribution.excluded_partitions,
            vec![PartitionId::new(1)]
        );
        assert_eq!(decoded.partition.mailbox_capacity, 1024);
    }
}
