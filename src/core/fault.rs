//! Skip and retry classification of item failures.
//!
//! The [`FaultPolicy`] decides, for every failure raised while reading,
//! transforming or writing, whether the chunk executor should drop the item
//! and move on, try again, or abort the partition. The rules are applied in
//! this order:
//!
//! 1. a kind that is neither skippable nor retryable is fatal;
//! 2. a retryable kind is retried while fewer than `retry_limit` attempts
//!    were made (never during reads: a consumed record cannot be read again);
//! 3. a skippable kind is skipped while fewer than `skip_limit` skips were
//!    recorded for the partition;
//! 4. anything else is fatal.
//!
//! # Examples
//!
//! ```
//! use partitioned_batch::core::fault::{FaultDecision, FaultPolicy};
//! use partitioned_batch::{FailureKind, Phase};
//!
//! let policy = FaultPolicy::new()
//!     .skip_limit(2)
//!     .skip(FailureKind::Validation)
//!     .retry_limit(1)
//!     .retry(FailureKind::Validation);
//!
//! // retries come first
//! assert_eq!(policy.classify(FailureKind::Validation, Phase::Write, 0, 0), FaultDecision::Retry);
//! // then the item is skipped
//! assert_eq!(policy.classify(FailureKind::Validation, Phase::Write, 1, 0), FaultDecision::Skip);
//! // until the skip budget is spent
//! assert_eq!(policy.classify(FailureKind::Validation, Phase::Write, 1, 2), FaultDecision::Fatal);
//! // unknown kinds are always fatal
//! assert_eq!(policy.classify(FailureKind::Io, Phase::Write, 0, 0), FaultDecision::Fatal);
//! ```

use std::collections::HashSet;

use crate::error::{BatchError, FailureKind, ItemFailure, Phase};

/// What to do with a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDecision {
    /// Drop the item and continue.
    Skip,
    /// Invoke the failing operation again on the same input.
    Retry,
    /// Abort the partition.
    Fatal,
}

/// Skip and retry configuration of a step.
///
/// The default policy tolerates nothing: every failure is fatal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultPolicy {
    skip_limit: usize,
    skippable: HashSet<FailureKind>,
    retry_limit: usize,
    retryable: HashSet<FailureKind>,
}

impl FaultPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of skips allowed per partition.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Declares `kind` as skippable.
    pub fn skip(mut self, kind: FailureKind) -> Self {
        self.skippable.insert(kind);
        self
    }

    /// Sets the maximum number of retries of a single operation.
    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Declares `kind` as retryable.
    pub fn retry(mut self, kind: FailureKind) -> Self {
        self.retryable.insert(kind);
        self
    }

    pub fn get_skip_limit(&self) -> usize {
        self.skip_limit
    }

    pub fn get_retry_limit(&self) -> usize {
        self.retry_limit
    }

    pub fn is_skippable(&self, kind: FailureKind) -> bool {
        self.skippable.contains(&kind)
    }

    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Classifies a failure.
    ///
    /// # Parameters
    /// - `kind`: kind of the failure
    /// - `phase`: phase the failure happened in
    /// - `attempts`: retries already made for the failing operation
    /// - `skip_count`: skips already recorded for the partition
    pub fn classify(
        &self,
        kind: FailureKind,
        phase: Phase,
        attempts: usize,
        skip_count: usize,
    ) -> FaultDecision {
        let skippable = self.is_skippable(kind);
        let retryable = self.is_retryable(kind) && phase != Phase::Read;

        if !skippable && !self.is_retryable(kind) {
            FaultDecision::Fatal
        } else if retryable && attempts < self.retry_limit {
            FaultDecision::Retry
        } else if skippable && skip_count < self.skip_limit {
            FaultDecision::Skip
        } else {
            FaultDecision::Fatal
        }
    }

    /// Builds the error surfaced for a failure classified as fatal.
    ///
    /// A skippable failure only becomes fatal once the skip budget is spent,
    /// in which case the error reports the exceeded limit.
    pub fn fatal_error(&self, phase: Phase, failure: ItemFailure) -> BatchError {
        if self.is_skippable(failure.kind) {
            BatchError::SkipLimitExceeded {
                limit: self.skip_limit,
                phase,
                failure,
            }
        } else {
            BatchError::from_phase(phase, failure)
        }
    }
}
