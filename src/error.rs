use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure kinds a source, transform or sink can report.
///
/// The fault policy classifies failures by this tag only, so components never
/// need to agree on concrete error types.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A record could not be mapped to an item (bad field value, bad type).
    Parse,
    /// A record does not have the expected shape (wrong number of fields).
    Format,
    /// An item was read correctly but rejected by business rules.
    Validation,
    /// The sink refused the chunk.
    Sink,
    /// Underlying I/O error.
    Io,
    /// A failure expected to go away on its own (lock timeout, busy resource).
    Transient,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Parse => "parse",
            FailureKind::Format => "format",
            FailureKind::Validation => "validation",
            FailureKind::Sink => "sink",
            FailureKind::Io => "io",
            FailureKind::Transient => "transient",
        };
        f.write_str(name)
    }
}

/// Pipeline phase in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Read,
    Process,
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Read => f.write_str("read"),
            Phase::Process => f.write_str("process"),
            Phase::Write => f.write_str("write"),
        }
    }
}

/// A per-item failure reported by an `ItemSource`, `ItemTransform` or `ItemSink`.
///
/// Besides its kind and message, a failure may carry the raw input that could
/// not be read and, for sinks, the position of the offending item in the
/// chunk that was submitted. The chunk executor relies on that position to
/// skip a single item out of a failed write.
///
/// # Examples
///
/// ```
/// use partitioned_batch::{FailureKind, ItemFailure};
///
/// let failure = ItemFailure::new(FailureKind::Parse, "age is not a number")
///     .with_input("Bob,abc");
///
/// assert_eq!(failure.kind, FailureKind::Parse);
/// assert_eq!(failure.input.as_deref(), Some("Bob,abc"));
/// assert_eq!(failure.to_string(), "parse failure: age is not a number");
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} failure: {message}")]
pub struct ItemFailure {
    /// Tag used by the fault policy
    pub kind: FailureKind,
    /// Human readable cause
    pub message: String,
    /// Raw record, when the failure happened before an item existed
    pub input: Option<String>,
    /// Index of the failing item inside the written chunk
    pub item_index: Option<usize>,
}

impl ItemFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            input: None,
            item_index: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Marks which item of a written chunk caused the failure.
    pub fn at_index(mut self, index: usize) -> Self {
        self.item_index = Some(index);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    #[error("ItemSource failure: {0}")]
    ReadFailure(ItemFailure),

    #[error("ItemTransform failure: {0}")]
    ProcessFailure(ItemFailure),

    #[error("ItemSink failure: {0}")]
    WriteFailure(ItemFailure),

    #[error("Skip limit of {limit} exceeded in {phase}: {failure}")]
    SkipLimitExceeded {
        limit: usize,
        phase: Phase,
        failure: ItemFailure,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Step {0} failed")]
    Step(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl BatchError {
    /// Wraps a failure into the error matching the phase it happened in.
    pub fn from_phase(phase: Phase, failure: ItemFailure) -> Self {
        match phase {
            Phase::Read => BatchError::ReadFailure(failure),
            Phase::Process => BatchError::ProcessFailure(failure),
            Phase::Write => BatchError::WriteFailure(failure),
        }
    }

    /// Returns the item failure behind this error, if any.
    pub fn failure(&self) -> Option<&ItemFailure> {
        match self {
            BatchError::ReadFailure(failure)
            | BatchError::ProcessFailure(failure)
            | BatchError::WriteFailure(failure)
            | BatchError::SkipLimitExceeded { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BatchError {
    fn from(error: std::io::Error) -> Self {
        BatchError::Io(error.to_string())
    }
}
