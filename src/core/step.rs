use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use uuid::Uuid;

use crate::error::{BatchError, FailureKind};

use super::{
    build_name,
    chunk::{ChunkExecutor, Processing},
    config::StepConfig,
    fault::FaultPolicy,
    item::{ItemSink, ItemSource, ItemSourceFactory, ItemTransform},
    listener::{ChunkListener, ListenerRegistry, SkipListener, StepExecutionListener},
    partition::Partitioner,
    pool::{PartitionOutcome, WorkerPool},
};

/// Status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Created, not started yet.
    Starting,
    /// Running.
    Started,
    /// Ended successfully.
    Completed,
    /// Ended on a fatal failure.
    Failed,
    /// Stopped on request. Reserved: nothing in this crate stops executions.
    Stopped,
}

/// Exit status reported for an execution.
///
/// Unlike [`BatchStatus`], the exit status is free-form: step listeners can
/// replace it from `after_step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: String,
    pub description: String,
}

impl ExitStatus {
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const FAILED: &'static str = "FAILED";
    pub const NOOP: &'static str = "NOOP";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(exit_code: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            description: String::new(),
        }
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    /// The execution had nothing to do.
    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            f.write_str(&self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.description)
        }
    }
}

/// Execution of a step, or of one partition of a partitioned step.
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Unique identifier of this execution
    pub id: Uuid,
    /// Name of the step (`step:partitionN` for a partition)
    pub name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of items successfully written
    pub write_count: usize,
    /// Number of items the transform filtered out
    pub filter_count: usize,
    /// Number of committed chunks
    pub commit_count: usize,
    /// Number of chunks that ended on a fatal failure
    pub rollback_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    /// Description of the failure that ended the execution
    pub failure: Option<String>,
    /// Executions of the partitions, for a partitioned step
    pub partitions: Vec<StepExecution>,
    started: Option<Instant>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::new(ExitStatus::EXECUTING),
            start_time: None,
            end_time: None,
            duration: Duration::ZERO,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            failure: None,
            partitions: Vec::new(),
            started: None,
        }
    }

    /// Total number of skipped items, all phases included.
    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub(crate) fn start(&mut self) {
        self.status = BatchStatus::Started;
        self.start_time = Some(Utc::now());
        self.started = Some(Instant::now());
    }

    /// Records the final status. A `NOOP` exit status set while running is kept
    /// on success.
    pub(crate) fn finish(&mut self, result: &Result<(), BatchError>) {
        self.end_time = Some(Utc::now());
        self.duration = self
            .started
            .map(|started| started.elapsed())
            .unwrap_or_default();

        match result {
            Ok(()) => {
                self.status = BatchStatus::Completed;
                if self.exit_status.exit_code != ExitStatus::NOOP {
                    self.exit_status = ExitStatus::completed();
                }
            }
            Err(error) => {
                self.status = BatchStatus::Failed;
                self.exit_status = ExitStatus::failed().with_description(&error.to_string());
                self.failure = Some(error.to_string());
            }
        }
    }

    /// Adds the counters of a partition to this execution.
    fn absorb(&mut self, partition: &StepExecution) {
        self.read_count += partition.read_count;
        self.write_count += partition.write_count;
        self.filter_count += partition.filter_count;
        self.commit_count += partition.commit_count;
        self.rollback_count += partition.rollback_count;
        self.read_skip_count += partition.read_skip_count;
        self.process_skip_count += partition.process_skip_count;
        self.write_skip_count += partition.write_skip_count;
    }

    /// One line summary of the execution.
    pub fn summary(&self) -> String {
        format!(
            "StepExecution: name={}, status={:?}, exitStatus={}, readCount={}, filterCount={}, writeCount={}, readSkipCount={}, writeSkipCount={}, processSkipCount={}, commitCount={}, rollbackCount={}, duration={}ms",
            self.name,
            self.status,
            self.exit_status.exit_code,
            self.read_count,
            self.filter_count,
            self.write_count,
            self.read_skip_count,
            self.write_skip_count,
            self.process_skip_count,
            self.commit_count,
            self.rollback_count,
            self.duration.as_millis()
        )
    }
}

/// A phase of a job.
pub trait Step {
    fn get_name(&self) -> &str;

    /// Executes the step, filling `step_execution` with its status and counters.
    ///
    /// # Returns
    /// - `Ok(())`: the step completed
    /// - `Err(BatchError)`: the fatal failure that made the step fail
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// Where the items of a step come from.
enum SourceBinding<'a, I> {
    /// A single source read by the calling thread.
    Single(&'a dyn ItemSource<I>),
    /// One source per partition, run on a worker pool.
    Partitioned {
        partitioner: &'a dyn Partitioner,
        factory: &'a dyn ItemSourceFactory<I>,
        pool: WorkerPool,
    },
}

/// A step reading, transforming and writing items chunk by chunk.
///
/// The step is either singular, reading one source on the calling thread, or
/// partitioned: the partitioner splits the input, a worker pool runs one chunk
/// executor per partition and the partitions' counters are added up. The
/// step fails as soon as one partition fails, once every partition ended.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    binding: SourceBinding<'a, I>,
    processing: Processing<'a, I, O>,
    sink: &'a (dyn ItemSink<O> + Sync),
    chunk_size: usize,
    policy: FaultPolicy,
    listeners: ListenerRegistry<I, O>,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        step_execution.start();
        info!(
            "Start of step: {}, id: {}",
            step_execution.name, step_execution.id
        );

        self.listeners.before_step(step_execution);

        let result = self.run(step_execution);
        step_execution.finish(&result);

        if let Some(exit_status) = self.listeners.after_step(step_execution) {
            step_execution.exit_status = exit_status;
        }

        match &result {
            Ok(()) => info!("End of step: {}", step_execution.summary()),
            Err(error) => error!("Step {} failed: {}", step_execution.name, error),
        }

        result
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    pub fn get_chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_partitioned(&self) -> bool {
        matches!(self.binding, SourceBinding::Partitioned { .. })
    }

    fn run(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        self.sink.open()?;

        let result = match &self.binding {
            SourceBinding::Single(source) => self.execute_single(*source, step_execution),
            SourceBinding::Partitioned {
                partitioner,
                factory,
                pool,
            } => self.execute_partitioned(*partitioner, *factory, pool, step_execution),
        };

        match self.sink.close() {
            Ok(()) => result,
            Err(error) if result.is_ok() => Err(error),
            Err(error) => {
                warn!("Unable to close sink of step {}: {}", self.name, error);
                result
            }
        }
    }

    fn execute_single(
        &self,
        source: &dyn ItemSource<I>,
        step_execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        let executor = ChunkExecutor {
            partition_id: &self.name,
            source,
            processing: &self.processing,
            sink: self.sink,
            chunk_size: self.chunk_size,
            policy: &self.policy,
            listeners: &self.listeners,
        };
        executor.execute(step_execution)
    }

    fn execute_partitioned(
        &self,
        partitioner: &dyn Partitioner,
        factory: &dyn ItemSourceFactory<I>,
        pool: &WorkerPool,
        step_execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        let partitions = partitioner.partition(pool.concurrency())?;

        if partitions.is_empty() {
            info!("Step {} has no partition to execute", self.name);
            step_execution.exit_status = ExitStatus::noop();
            return Ok(());
        }

        info!(
            "Step {} split into {} partitions (concurrency {})",
            self.name,
            partitions.len(),
            pool.concurrency()
        );

        let step_name = self.name.as_str();
        let processing = &self.processing;
        let sink = self.sink;
        let chunk_size = self.chunk_size;
        let policy = &self.policy;
        let listeners = &self.listeners;

        let outcomes = pool.run(partitions, |name, context| {
            let mut execution = StepExecution::new(&format!("{}:{}", step_name, name));
            execution.start();

            let result = factory.create(context).and_then(|source| {
                ChunkExecutor {
                    partition_id: name,
                    source: source.as_ref(),
                    processing,
                    sink,
                    chunk_size,
                    policy,
                    listeners,
                }
                .execute(&mut execution)
            });

            execution.finish(&result);
            PartitionOutcome::new(name, execution, result.err())
        });

        let mut first_error = None;
        for (name, outcome) in outcomes {
            step_execution.absorb(&outcome.execution);
            if let Some(error) = outcome.error {
                error!("Partition {} of step {} failed: {}", name, self.name, error);
                first_error.get_or_insert(error);
            }
            step_execution.partitions.push(outcome.execution);
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Entry point for building steps.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::item::{ItemSink, ItemSinkResult, ItemSource, ItemSourceResult};
/// use partitioned_batch::core::step::{BatchStatus, Step, StepBuilder, StepExecution};
/// use partitioned_batch::FailureKind;
/// use std::cell::Cell;
/// use std::sync::Mutex;
///
/// struct Numbers(Cell<u32>);
///
/// impl ItemSource<u32> for Numbers {
///     fn read(&self) -> ItemSourceResult<u32> {
///         let next = self.0.get() + 1;
///         self.0.set(next);
///         Ok((next <= 5).then_some(next))
///     }
/// }
///
/// #[derive(Default)]
/// struct Collect(Mutex<Vec<u32>>);
///
/// impl ItemSink<u32> for Collect {
///     fn write(&self, items: &[u32]) -> ItemSinkResult {
///         self.0.lock().unwrap().extend_from_slice(items);
///         Ok(())
///     }
/// }
///
/// let source = Numbers(Cell::new(0));
/// let sink = Collect::default();
///
/// let step = StepBuilder::new("numbers")
///     .chunk::<u32>(2)
///     .source(&source)
///     .sink(&sink)
///     .skip_limit(1)
///     .skip(FailureKind::Parse)
///     .build()
///     .unwrap();
///
/// let mut execution = StepExecution::new("numbers");
/// step.execute(&mut execution).unwrap();
///
/// assert_eq!(execution.status, BatchStatus::Completed);
/// assert_eq!(execution.commit_count, 3);
/// assert_eq!(*sink.0.lock().unwrap(), vec![1, 2, 3, 4, 5]);
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Unnamed step builder; a random name is generated.
    pub fn unnamed() -> Self {
        Self::new(&build_name())
    }

    /// Starts a chunk-oriented step whose items go to the sink unchanged,
    /// unless a transform is set.
    pub fn chunk<'a, T>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, T, T> {
        let identity: fn(T) -> T = std::convert::identity;
        ChunkOrientedStepBuilder::new(&self.name, chunk_size, Some(identity))
    }

    /// Starts a chunk-oriented step turning `I` items into `O` items; a
    /// transform must be set.
    pub fn chunk_with_transform<'a, I, O>(
        self,
        chunk_size: usize,
    ) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name, chunk_size, None)
    }
}

/// Builder for [`ChunkOrientedStep`].
pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    source: Option<&'a dyn ItemSource<I>>,
    partitioner: Option<&'a dyn Partitioner>,
    factory: Option<&'a dyn ItemSourceFactory<I>>,
    transform: Option<&'a (dyn ItemTransform<I, O> + Sync)>,
    identity: Option<fn(I) -> O>,
    sink: Option<&'a (dyn ItemSink<O> + Sync)>,
    chunk_size: usize,
    concurrency: usize,
    policy: FaultPolicy,
    listeners: ListenerRegistry<I, O>,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    fn new(name: &str, chunk_size: usize, identity: Option<fn(I) -> O>) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            partitioner: None,
            factory: None,
            transform: None,
            identity,
            sink: None,
            chunk_size,
            concurrency: 1,
            policy: FaultPolicy::default(),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Reads every item from `source` on the calling thread.
    pub fn source(mut self, source: &'a dyn ItemSource<I>) -> Self {
        self.source = Some(source);
        self
    }

    /// Splits the step with `partitioner`; each partition reads from a source
    /// created by `factory` out of the partition context.
    pub fn partitioned(
        mut self,
        partitioner: &'a dyn Partitioner,
        factory: &'a dyn ItemSourceFactory<I>,
    ) -> Self {
        self.partitioner = Some(partitioner);
        self.factory = Some(factory);
        self
    }

    /// Maximum number of partitions running at the same time.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn transform(mut self, transform: &'a (dyn ItemTransform<I, O> + Sync)) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn sink(mut self, sink: &'a (dyn ItemSink<O> + Sync)) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.policy = self.policy.skip_limit(skip_limit);
        self
    }

    pub fn skip(mut self, kind: FailureKind) -> Self {
        self.policy = self.policy.skip(kind);
        self
    }

    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.policy = self.policy.retry_limit(retry_limit);
        self
    }

    pub fn retry(mut self, kind: FailureKind) -> Self {
        self.policy = self.policy.retry(kind);
        self
    }

    /// Replaces the whole fault policy.
    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Applies chunk size, concurrency and fault tolerance from `config`.
    ///
    /// `config.partition_key` belongs to the partitioner and the source
    /// factory, which take it through their own `config` methods.
    pub fn config(mut self, config: &StepConfig) -> Self {
        self.chunk_size = config.chunk_size;
        self.concurrency = config.concurrency;
        self.policy = FaultPolicy::from(&config.fault_tolerance);
        self
    }

    pub fn step_listener(mut self, listener: Arc<dyn StepExecutionListener>) -> Self {
        self.listeners.register_step_listener(listener);
        self
    }

    pub fn chunk_listener(mut self, listener: Arc<dyn ChunkListener>) -> Self {
        self.listeners.register_chunk_listener(listener);
        self
    }

    pub fn skip_listener(mut self, listener: Arc<dyn SkipListener<I, O>>) -> Self {
        self.listeners.register_skip_listener(listener);
        self
    }

    /// Builds the step.
    ///
    /// # Errors
    /// `BatchError::Configuration` when the chunk size or the concurrency is
    /// zero, when no sink is set, when neither or both of a source and a
    /// partitioner are set, or when the item types differ and no transform is
    /// set.
    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(configuration("chunk size must be positive"));
        }

        let sink = self.sink.ok_or_else(|| configuration("a sink is required"))?;

        let processing = match (self.transform, self.identity) {
            (Some(transform), _) => Processing::Transform(transform),
            (None, Some(identity)) => Processing::Identity(identity),
            (None, None) => return Err(configuration("a transform is required")),
        };

        let binding = match (self.source, self.partitioner, self.factory) {
            (Some(source), None, None) => SourceBinding::Single(source),
            (None, Some(partitioner), Some(factory)) => SourceBinding::Partitioned {
                partitioner,
                factory,
                pool: WorkerPool::new(self.concurrency)?,
            },
            (None, _, _) => return Err(configuration("a source or a partitioner is required")),
            (Some(_), _, _) => {
                return Err(configuration(
                    "a step cannot have both a source and a partitioner",
                ));
            }
        };

        Ok(ChunkOrientedStep {
            name: self.name,
            binding,
            processing,
            sink,
            chunk_size: self.chunk_size,
            policy: self.policy,
            listeners: self.listeners,
        })
    }
}

fn configuration(message: &str) -> BatchError {
    BatchError::Configuration(message.to_string())
}
