use std::time::Instant;

use log::{debug, error, warn};

use crate::error::{BatchError, Phase};

use super::{
    fault::{FaultDecision, FaultPolicy},
    item::{ItemSink, ItemSource, ItemTransform},
    listener::{ChunkContext, ListenerRegistry},
    step::StepExecution,
};

/// Upper bound of the buffer reserved up front for a chunk.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// States a chunk goes through.
///
/// `Reading`, `Processing` and `Writing` enter `Resolving` when a failure is
/// handed to the fault policy; the chunk ends either `Committed` or `Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Idle,
    Reading,
    Processing,
    Writing,
    Resolving(Phase),
    Committed,
    Fatal,
}

/// Whether the source still has items after a chunk was committed.
#[derive(Debug, PartialEq)]
enum ChunkStatus {
    Continuable,
    Finished,
}

/// How items go from the input type to the output type.
pub(crate) enum Processing<'a, I, O> {
    Transform(&'a (dyn ItemTransform<I, O> + Sync)),
    /// No transform configured: items are handed to the sink unchanged.
    Identity(fn(I) -> O),
}

/// Drives the read / process / write cycle of one partition, chunk after chunk.
///
/// Skips and retries are resolved here and only show up in the counters of the
/// `StepExecution` and in listener notifications; the first fatal failure stops
/// the loop and is returned to the caller.
pub(crate) struct ChunkExecutor<'a, I, O> {
    pub(crate) partition_id: &'a str,
    pub(crate) source: &'a dyn ItemSource<I>,
    pub(crate) processing: &'a Processing<'a, I, O>,
    pub(crate) sink: &'a dyn ItemSink<O>,
    pub(crate) chunk_size: usize,
    pub(crate) policy: &'a FaultPolicy,
    pub(crate) listeners: &'a ListenerRegistry<I, O>,
}

impl<I, O> ChunkExecutor<'_, I, O> {
    /// Opens the source, processes every chunk, then closes the source.
    pub(crate) fn execute(&self, execution: &mut StepExecution) -> Result<(), BatchError> {
        self.source.open()?;

        let result = self.execute_chunks(execution);

        if let Err(error) = self.source.close() {
            warn!("{}: unable to close source: {}", self.partition_id, error);
        }

        result
    }

    fn execute_chunks(&self, execution: &mut StepExecution) -> Result<(), BatchError> {
        let mut chunk_number = 0;

        loop {
            chunk_number += 1;
            let mut context = ChunkContext::new(self.partition_id, chunk_number);
            self.listeners.before_chunk(&mut context);
            let start = Instant::now();

            match self.execute_chunk(execution, chunk_number) {
                Ok(status) => {
                    self.listeners.after_chunk(&context, start.elapsed());
                    if status == ChunkStatus::Finished {
                        return Ok(());
                    }
                }
                Err(error) => {
                    execution.rollback_count += 1;
                    error!(
                        "{}: chunk {} failed: {}",
                        self.partition_id, chunk_number, error
                    );
                    self.listeners.after_chunk_error(&context, &error);
                    return Err(error);
                }
            }
        }
    }

    fn execute_chunk(
        &self,
        execution: &mut StepExecution,
        chunk_number: usize,
    ) -> Result<ChunkStatus, BatchError> {
        let mut state = ChunkState::Idle;

        self.transition(&mut state, ChunkState::Reading, chunk_number);
        let skips_before = execution.skip_count();
        let (items, status) = self.read_chunk(execution, &mut state)?;

        if items.is_empty() && execution.skip_count() == skips_before {
            debug!("{}: nothing left to read", self.partition_id);
            return Ok(ChunkStatus::Finished);
        }

        self.transition(&mut state, ChunkState::Processing, chunk_number);
        let outputs = self.process_chunk(execution, items, &mut state)?;

        self.transition(&mut state, ChunkState::Writing, chunk_number);
        self.write_chunk(execution, outputs, &mut state)?;

        self.transition(&mut state, ChunkState::Committed, chunk_number);
        execution.commit_count += 1;

        Ok(status)
    }

    fn transition(&self, state: &mut ChunkState, next: ChunkState, chunk_number: usize) {
        debug!(
            "{}: chunk {} {:?} -> {:?}",
            self.partition_id, chunk_number, state, next
        );
        *state = next;
    }

    /// Reads up to `chunk_size` items. Skipped records do not count toward the
    /// chunk size.
    fn read_chunk(
        &self,
        execution: &mut StepExecution,
        state: &mut ChunkState,
    ) -> Result<(Vec<I>, ChunkStatus), BatchError> {
        let mut items = Vec::with_capacity(self.chunk_size.min(MAX_PREALLOCATED_ITEMS));

        while items.len() < self.chunk_size {
            match self.source.read() {
                Ok(Some(item)) => {
                    items.push(item);
                    execution.read_count += 1;
                }
                Ok(None) => return Ok((items, ChunkStatus::Finished)),
                Err(failure) => {
                    *state = ChunkState::Resolving(Phase::Read);
                    let decision =
                        self.policy
                            .classify(failure.kind, Phase::Read, 0, execution.skip_count());

                    match decision {
                        FaultDecision::Skip => {
                            warn!("{}: skipping unreadable item: {}", self.partition_id, failure);
                            execution.read_skip_count += 1;
                            self.listeners.on_skip_in_read(&failure);
                            *state = ChunkState::Reading;
                        }
                        FaultDecision::Retry | FaultDecision::Fatal => {
                            *state = ChunkState::Fatal;
                            return Err(self.policy.fatal_error(Phase::Read, failure));
                        }
                    }
                }
            }
        }

        Ok((items, ChunkStatus::Continuable))
    }

    /// Applies the transform to every item, in order.
    fn process_chunk(
        &self,
        execution: &mut StepExecution,
        items: Vec<I>,
        state: &mut ChunkState,
    ) -> Result<Vec<O>, BatchError> {
        let transform = match self.processing {
            Processing::Identity(convert) => return Ok(items.into_iter().map(convert).collect()),
            Processing::Transform(transform) => transform,
        };

        let mut outputs = Vec::with_capacity(items.len());

        for item in &items {
            let mut attempts = 0;

            loop {
                match transform.process(item) {
                    Ok(Some(output)) => {
                        outputs.push(output);
                        break;
                    }
                    Ok(None) => {
                        execution.filter_count += 1;
                        break;
                    }
                    Err(failure) => {
                        *state = ChunkState::Resolving(Phase::Process);
                        let decision = self.policy.classify(
                            failure.kind,
                            Phase::Process,
                            attempts,
                            execution.skip_count(),
                        );

                        match decision {
                            FaultDecision::Retry => {
                                attempts += 1;
                                debug!(
                                    "{}: retrying item (attempt {}): {}",
                                    self.partition_id, attempts, failure
                                );
                            }
                            FaultDecision::Skip => {
                                warn!("{}: skipping item in process: {}", self.partition_id, failure);
                                execution.process_skip_count += 1;
                                self.listeners.on_skip_in_process(item, &failure);
                                break;
                            }
                            FaultDecision::Fatal => {
                                *state = ChunkState::Fatal;
                                return Err(self.policy.fatal_error(Phase::Process, failure));
                            }
                        }
                    }
                }
            }
            *state = ChunkState::Processing;
        }

        Ok(outputs)
    }

    /// Writes the surviving items as one call.
    ///
    /// Retries resubmit the whole chunk. A skip removes the item the sink
    /// pointed at and resubmits the rest; when the sink cannot tell which item
    /// failed the chunk is fatal.
    fn write_chunk(
        &self,
        execution: &mut StepExecution,
        mut outputs: Vec<O>,
        state: &mut ChunkState,
    ) -> Result<(), BatchError> {
        let mut attempts = 0;

        loop {
            if outputs.is_empty() {
                debug!("{}: no items to write, skipping write call", self.partition_id);
                return Ok(());
            }

            let failure = match self.sink.write(&outputs) {
                Ok(()) => {
                    execution.write_count += outputs.len();
                    return Ok(());
                }
                Err(failure) => failure,
            };

            *state = ChunkState::Resolving(Phase::Write);
            let decision =
                self.policy
                    .classify(failure.kind, Phase::Write, attempts, execution.skip_count());

            match decision {
                FaultDecision::Retry => {
                    attempts += 1;
                    debug!(
                        "{}: retrying chunk of {} items (attempt {}): {}",
                        self.partition_id,
                        outputs.len(),
                        attempts,
                        failure
                    );
                }
                FaultDecision::Skip => {
                    let Some(index) = failure.item_index.filter(|index| *index < outputs.len())
                    else {
                        *state = ChunkState::Fatal;
                        return Err(BatchError::WriteFailure(failure));
                    };

                    let skipped = outputs.remove(index);
                    warn!("{}: skipping item in write: {}", self.partition_id, failure);
                    execution.write_skip_count += 1;
                    self.listeners.on_skip_in_write(&skipped, &failure);
                    attempts = 0;
                }
                FaultDecision::Fatal => {
                    *state = ChunkState::Fatal;
                    return Err(self.policy.fatal_error(Phase::Write, failure));
                }
            }
            *state = ChunkState::Writing;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use crate::{
        core::{item::ItemSourceResult, listener::SkipListener},
        error::{FailureKind, ItemFailure},
    };

    use super::*;

    /// Source replaying a script of read results.
    struct ScriptedSource {
        script: RefCell<VecDeque<ItemSourceResult<String>>>,
        opened: Cell<bool>,
        closed: Cell<bool>,
    }

    impl ScriptedSource {
        fn new(script: Vec<ItemSourceResult<String>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                opened: Cell::new(false),
                closed: Cell::new(false),
            }
        }

        fn of(items: &[&str]) -> Self {
            Self::new(items.iter().map(|item| Ok(Some(item.to_string()))).collect())
        }
    }

    impl ItemSource<String> for ScriptedSource {
        fn open(&self) -> Result<(), BatchError> {
            self.opened.set(true);
            Ok(())
        }

        fn read(&self) -> ItemSourceResult<String> {
            self.script.borrow_mut().pop_front().unwrap_or(Ok(None))
        }

        fn close(&self) -> Result<(), BatchError> {
            self.closed.set(true);
            Ok(())
        }
    }

    /// Sink recording the chunks it accepted and failing on a given item.
    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<Vec<String>>>,
        calls: Mutex<usize>,
        poison: Option<&'static str>,
        report_index: bool,
    }

    impl ItemSink<String> for RecordingSink {
        fn write(&self, items: &[String]) -> crate::core::item::ItemSinkResult {
            *self.calls.lock().unwrap() += 1;
            if let Some(poison) = self.poison {
                if let Some(index) = items.iter().position(|item| item == poison) {
                    let failure = ItemFailure::new(FailureKind::Validation, "poisoned item");
                    return Err(if self.report_index {
                        failure.at_index(index)
                    } else {
                        failure
                    });
                }
            }
            self.chunks.lock().unwrap().push(items.to_vec());
            Ok(())
        }
    }

    /// Transform failing a fixed number of times on a given item.
    struct FlakyTransform {
        target: &'static str,
        failures: Mutex<usize>,
        kind: FailureKind,
    }

    impl ItemTransform<String, String> for FlakyTransform {
        fn process(&self, item: &String) -> crate::core::item::ItemTransformResult<String> {
            if item == self.target {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ItemFailure::new(self.kind, "flaky"));
                }
            }
            if item.starts_with('#') {
                return Ok(None);
            }
            Ok(Some(item.to_uppercase()))
        }
    }

    #[derive(Default)]
    struct SkipRecorder {
        skipped: Mutex<Vec<String>>,
    }

    impl SkipListener<String, String> for SkipRecorder {
        fn on_skip_in_read(&self, failure: &ItemFailure) {
            self.skipped
                .lock()
                .unwrap()
                .push(format!("read:{}", failure.input.clone().unwrap_or_default()));
        }

        fn on_skip_in_process(&self, item: &String, _failure: &ItemFailure) {
            self.skipped.lock().unwrap().push(format!("process:{}", item));
        }

        fn on_skip_in_write(&self, item: &String, _failure: &ItemFailure) {
            self.skipped.lock().unwrap().push(format!("write:{}", item));
        }
    }

    fn parse_error(input: &str) -> ItemSourceResult<String> {
        Err(ItemFailure::new(FailureKind::Parse, "bad record").with_input(input))
    }

    fn run(
        source: &dyn ItemSource<String>,
        processing: &Processing<String, String>,
        sink: &dyn ItemSink<String>,
        chunk_size: usize,
        policy: &FaultPolicy,
        listeners: &ListenerRegistry<String, String>,
    ) -> (StepExecution, Result<(), BatchError>) {
        let executor = ChunkExecutor {
            partition_id: "partition0",
            source,
            processing,
            sink,
            chunk_size,
            policy,
            listeners,
        };
        let mut execution = StepExecution::new("test");
        let result = executor.execute(&mut execution);
        (execution, result)
    }

    #[test]
    fn should_write_one_call_per_chunk() {
        let source = ScriptedSource::of(&["a", "b", "c", "d", "e"]);
        let sink = RecordingSink::default();

        let (execution, result) = run(
            &source,
            &Processing::Identity(std::convert::identity),
            &sink,
            2,
            &FaultPolicy::default(),
            &ListenerRegistry::new(),
        );

        assert!(result.is_ok());
        assert!(source.opened.get() && source.closed.get());
        assert_eq!(
            *sink.chunks.lock().unwrap(),
            vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]
        );
        assert_eq!(execution.read_count, 5);
        assert_eq!(execution.write_count, 5);
        assert_eq!(execution.commit_count, 3);
    }

    #[test]
    fn read_skips_should_not_count_toward_chunk_size() {
        let source = ScriptedSource::new(vec![
            Ok(Some("a".to_string())),
            parse_error("b;;"),
            Ok(Some("c".to_string())),
            Ok(Some("d".to_string())),
        ]);
        let sink = RecordingSink::default();
        let recorder = Arc::new(SkipRecorder::default());
        let mut listeners = ListenerRegistry::new();
        listeners.register_skip_listener(recorder.clone());
        let policy = FaultPolicy::new().skip_limit(1).skip(FailureKind::Parse);

        let (execution, result) = run(
            &source,
            &Processing::Identity(std::convert::identity),
            &sink,
            2,
            &policy,
            &listeners,
        );

        assert!(result.is_ok());
        assert_eq!(*sink.chunks.lock().unwrap(), vec![vec!["a", "c"], vec!["d"]]);
        assert_eq!(execution.read_skip_count, 1);
        assert_eq!(execution.read_count + execution.read_skip_count, 4);
        assert_eq!(*recorder.skipped.lock().unwrap(), vec!["read:b;;"]);
    }

    #[test]
    fn read_failure_beyond_skip_limit_should_be_fatal() {
        let source = ScriptedSource::new(vec![
            Ok(Some("a".to_string())),
            parse_error("x"),
            parse_error("y"),
            Ok(Some("b".to_string())),
        ]);
        let sink = RecordingSink::default();
        let policy = FaultPolicy::new().skip_limit(1).skip(FailureKind::Parse);

        let (execution, result) = run(
            &source,
            &Processing::Identity(std::convert::identity),
            &sink,
            3,
            &policy,
            &ListenerRegistry::new(),
        );

        assert!(matches!(
            result,
            Err(BatchError::SkipLimitExceeded { limit: 1, phase: Phase::Read, .. })
        ));
        assert_eq!(execution.read_skip_count, 1);
        assert_eq!(execution.write_count, 0);
        assert_eq!(execution.rollback_count, 1);
        assert!(source.closed.get());
    }

    #[test]
    fn should_retry_transform_then_succeed_without_skip() {
        let source = ScriptedSource::of(&["a", "b"]);
        let sink = RecordingSink::default();
        let transform = FlakyTransform {
            target: "b",
            failures: Mutex::new(2),
            kind: FailureKind::Transient,
        };
        let policy = FaultPolicy::new()
            .retry_limit(2)
            .retry(FailureKind::Transient);

        let (execution, result) = run(
            &source,
            &Processing::Transform(&transform),
            &sink,
            10,
            &policy,
            &ListenerRegistry::new(),
        );

        assert!(result.is_ok());
        assert_eq!(*sink.chunks.lock().unwrap(), vec![vec!["A", "B"]]);
        assert_eq!(execution.skip_count(), 0);
    }

    #[test]
    fn should_skip_transform_failure_after_retries() {
        let source = ScriptedSource::of(&["a", "b", "#comment", "c"]);
        let sink = RecordingSink::default();
        let transform = FlakyTransform {
            target: "b",
            failures: Mutex::new(5),
            kind: FailureKind::Validation,
        };
        let recorder = Arc::new(SkipRecorder::default());
        let mut listeners = ListenerRegistry::new();
        listeners.register_skip_listener(recorder.clone());
        let policy = FaultPolicy::new()
            .retry_limit(1)
            .retry(FailureKind::Validation)
            .skip_limit(1)
            .skip(FailureKind::Validation);

        let (execution, result) = run(
            &source,
            &Processing::Transform(&transform),
            &sink,
            10,
            &policy,
            &listeners,
        );

        assert!(result.is_ok());
        assert_eq!(*sink.chunks.lock().unwrap(), vec![vec!["A", "C"]]);
        assert_eq!(execution.process_skip_count, 1);
        assert_eq!(execution.filter_count, 1);
        // one initial attempt plus one retry
        assert_eq!(*transform.failures.lock().unwrap(), 3);
        assert_eq!(*recorder.skipped.lock().unwrap(), vec!["process:b"]);
    }

    #[test]
    fn should_skip_reported_item_in_write() {
        let source = ScriptedSource::of(&["Alice", "Bob", "PEDRO"]);
        let sink = RecordingSink {
            poison: Some("PEDRO"),
            report_index: true,
            ..Default::default()
        };
        let recorder = Arc::new(SkipRecorder::default());
        let mut listeners = ListenerRegistry::new();
        listeners.register_skip_listener(recorder.clone());
        let policy = FaultPolicy::new()
            .skip_limit(2)
            .skip(FailureKind::Validation)
            .retry_limit(1)
            .retry(FailureKind::Validation);

        let (execution, result) = run(
            &source,
            &Processing::Identity(std::convert::identity),
            &sink,
            2,
            &policy,
            &listeners,
        );

        assert!(result.is_ok());
        assert_eq!(*sink.chunks.lock().unwrap(), vec![vec!["Alice", "Bob"]]);
        // first chunk, failed PEDRO chunk, its retry
        assert_eq!(*sink.calls.lock().unwrap(), 3);
        assert_eq!(execution.write_count, 2);
        assert_eq!(execution.write_skip_count, 1);
        assert_eq!(execution.commit_count, 2);
        assert_eq!(*recorder.skipped.lock().unwrap(), vec!["write:PEDRO"]);
    }

    #[test]
    fn write_skip_without_item_index_should_be_fatal() {
        let source = ScriptedSource::of(&["Alice", "PEDRO"]);
        let sink = RecordingSink {
            poison: Some("PEDRO"),
            report_index: false,
            ..Default::default()
        };
        let policy = FaultPolicy::new().skip_limit(5).skip(FailureKind::Validation);

        let (execution, result) = run(
            &source,
            &Processing::Identity(std::convert::identity),
            &sink,
            2,
            &policy,
            &ListenerRegistry::new(),
        );

        assert!(matches!(result, Err(BatchError::WriteFailure(_))));
        assert_eq!(execution.write_count, 0);
        assert_eq!(execution.write_skip_count, 0);
    }

    #[test]
    fn empty_source_should_finish_without_writing() {
        let source = ScriptedSource::of(&[]);
        let sink = RecordingSink::default();

        let (execution, result) = run(
            &source,
            &Processing::Identity(std::convert::identity),
            &sink,
            2,
            &FaultPolicy::default(),
            &ListenerRegistry::new(),
        );

        assert!(result.is_ok());
        assert_eq!(*sink.calls.lock().unwrap(), 0);
        assert_eq!(execution.commit_count, 0);
    }
}
