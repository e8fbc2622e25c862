//! Step settings that can be loaded from JSON.
//!
//! ```
//! use partitioned_batch::core::config::StepConfig;
//! use partitioned_batch::FailureKind;
//!
//! let config = StepConfig::from_json_str(r#"{
//!     "chunk_size": 2,
//!     "concurrency": 5,
//!     "fault_tolerance": {
//!         "skip_limit": 2,
//!         "skippable": ["parse", "validation"],
//!         "retry_limit": 1,
//!         "retryable": ["validation"]
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(config.chunk_size, 2);
//! assert_eq!(config.partition_key, "fileName");
//! assert!(config.fault_tolerance.skippable.contains(&FailureKind::Parse));
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, FailureKind};

use super::{fault::FaultPolicy, partition::DEFAULT_KEY_NAME};

/// Settings of a chunk-oriented step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Maximum number of items per chunk
    pub chunk_size: usize,
    /// Maximum number of partitions running at the same time
    pub concurrency: usize,
    /// Context key holding the input location of a partition.
    ///
    /// Read by the partitioner and the source factory (see
    /// `MultiResourcePartitionerBuilder::config`), not by the step builder.
    pub partition_key: String,
    pub fault_tolerance: FaultToleranceConfig,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            concurrency: 1,
            partition_key: DEFAULT_KEY_NAME.to_string(),
            fault_tolerance: FaultToleranceConfig::default(),
        }
    }
}

/// Skip and retry settings. Missing fields tolerate nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceConfig {
    pub skip_limit: usize,
    pub skippable: Vec<FailureKind>,
    pub retry_limit: usize,
    pub retryable: Vec<FailureKind>,
}

impl StepConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, BatchError> {
        let config: StepConfig = serde_json::from_str(json)
            .map_err(|error| BatchError::Configuration(format!("invalid step config: {}", error)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(BatchError::Configuration(
                "worker concurrency must be positive".to_string(),
            ));
        }
        if self.partition_key.is_empty() {
            return Err(BatchError::Configuration(
                "partition key name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&FaultToleranceConfig> for FaultPolicy {
    fn from(config: &FaultToleranceConfig) -> Self {
        let policy = FaultPolicy::new()
            .skip_limit(config.skip_limit)
            .retry_limit(config.retry_limit);
        let policy = config
            .skippable
            .iter()
            .fold(policy, |policy, kind| policy.skip(*kind));
        config
            .retryable
            .iter()
            .fold(policy, |policy, kind| policy.retry(*kind))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn should_apply_defaults() {
        let config = StepConfig::from_json_str("{}").unwrap();
        assert_eq!(config, StepConfig::default());
        assert_eq!(FaultPolicy::from(&config.fault_tolerance), FaultPolicy::default());
    }

    #[test]
    fn should_reject_zero_chunk_size() {
        let result = StepConfig::from_json_str(r#"{"chunk_size": 0}"#);
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn should_reject_unknown_failure_kind() {
        let result = StepConfig::from_json_str(r#"{"fault_tolerance": {"skippable": ["oops"]}}"#);
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn should_build_fault_policy() {
        let config = FaultToleranceConfig {
            skip_limit: 2,
            skippable: vec![FailureKind::Parse],
            retry_limit: 3,
            retryable: vec![FailureKind::Transient],
        };

        let policy = FaultPolicy::from(&config);

        assert_eq!(policy.get_skip_limit(), 2);
        assert_eq!(policy.get_retry_limit(), 3);
        assert!(policy.is_skippable(FailureKind::Parse));
        assert!(policy.is_retryable(FailureKind::Transient));
        assert!(!policy.is_skippable(FailureKind::Transient));
    }

    #[test]
    fn should_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"chunk_size": 3, "partition_key": "input"}}"#).unwrap();

        let config = StepConfig::from_path(file.path()).unwrap();

        assert_eq!(config.chunk_size, 3);
        assert_eq!(config.partition_key, "input");
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn missing_file_should_be_an_io_error() {
        let result = StepConfig::from_path("/no/such/config.json");
        assert!(matches!(result, Err(BatchError::Io(_))));
    }
}
