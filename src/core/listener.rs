//! Lifecycle observers and the registries that notify them.
//!
//! Listeners are notified in registration order. They receive the executions
//! by shared reference and cannot alter them; the only state they may write is
//! the attribute map of the [`ChunkContext`] handed to `before_chunk`, and the
//! exit status they may return from `after_step`.

use std::{fmt::Debug, sync::Arc, time::Duration};

use log::{info, warn};

use crate::error::{BatchError, ItemFailure};

use super::{context::ExecutionContext, job::JobExecution, step::ExitStatus, step::StepExecution};

/// Observes the start and the end of each job run.
pub trait JobExecutionListener: Send + Sync {
    fn before_job(&self, _job_execution: &JobExecution) {}

    /// Called exactly once per run, whether the run completed or failed.
    fn after_job(&self, _job_execution: &JobExecution) {}
}

/// Observes the start and the end of a step.
pub trait StepExecutionListener: Send + Sync {
    fn before_step(&self, _step_execution: &StepExecution) {}

    /// Called once the step reached its final status.
    ///
    /// Returning `Some` replaces the exit status reported for the step.
    fn after_step(&self, _step_execution: &StepExecution) -> Option<ExitStatus> {
        None
    }
}

/// Observes each chunk of each partition.
pub trait ChunkListener: Send + Sync {
    fn before_chunk(&self, _context: &mut ChunkContext) {}

    fn after_chunk(&self, _context: &ChunkContext, _elapsed: Duration) {}

    fn after_chunk_error(&self, _context: &ChunkContext, _error: &BatchError) {}
}

/// Observes items dropped by the fault policy.
pub trait SkipListener<I, O>: Send + Sync {
    fn on_skip_in_read(&self, _failure: &ItemFailure) {}

    fn on_skip_in_process(&self, _item: &I, _failure: &ItemFailure) {}

    fn on_skip_in_write(&self, _item: &O, _failure: &ItemFailure) {}
}

/// Scope of one chunk, handed to chunk listeners.
#[derive(Debug, Clone)]
pub struct ChunkContext {
    partition_id: String,
    chunk_number: usize,
    attributes: ExecutionContext,
}

impl ChunkContext {
    pub fn new(partition_id: &str, chunk_number: usize) -> Self {
        Self {
            partition_id: partition_id.to_string(),
            chunk_number,
            attributes: ExecutionContext::new(),
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Position of the chunk in its partition, starting at 1.
    pub fn chunk_number(&self) -> usize {
        self.chunk_number
    }

    pub fn attributes(&self) -> &ExecutionContext {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut ExecutionContext {
        &mut self.attributes
    }
}

/// Job level listeners.
#[derive(Default, Clone)]
pub struct JobListenerRegistry {
    listeners: Vec<Arc<dyn JobExecutionListener>>,
}

impl JobListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn JobExecutionListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn before_job(&self, job_execution: &JobExecution) {
        self.listeners
            .iter()
            .for_each(|listener| listener.before_job(job_execution));
    }

    pub fn after_job(&self, job_execution: &JobExecution) {
        self.listeners
            .iter()
            .for_each(|listener| listener.after_job(job_execution));
    }
}

/// Step, chunk and skip listeners of one step.
///
/// The registry is shared by every worker of a partitioned step, which is why
/// all listeners must be `Send + Sync`.
pub struct ListenerRegistry<I, O> {
    step_listeners: Vec<Arc<dyn StepExecutionListener>>,
    chunk_listeners: Vec<Arc<dyn ChunkListener>>,
    skip_listeners: Vec<Arc<dyn SkipListener<I, O>>>,
}

impl<I, O> Default for ListenerRegistry<I, O> {
    fn default() -> Self {
        Self {
            step_listeners: Vec::new(),
            chunk_listeners: Vec::new(),
            skip_listeners: Vec::new(),
        }
    }
}

impl<I, O> ListenerRegistry<I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_step_listener(&mut self, listener: Arc<dyn StepExecutionListener>) {
        self.step_listeners.push(listener);
    }

    pub fn register_chunk_listener(&mut self, listener: Arc<dyn ChunkListener>) {
        self.chunk_listeners.push(listener);
    }

    pub fn register_skip_listener(&mut self, listener: Arc<dyn SkipListener<I, O>>) {
        self.skip_listeners.push(listener);
    }

    pub fn before_step(&self, step_execution: &StepExecution) {
        for listener in &self.step_listeners {
            listener.before_step(step_execution);
        }
    }

    /// Notifies every step listener and returns the last exit status override.
    pub fn after_step(&self, step_execution: &StepExecution) -> Option<ExitStatus> {
        let mut exit_status = None;
        for listener in &self.step_listeners {
            if let Some(status) = listener.after_step(step_execution) {
                exit_status = Some(status);
            }
        }
        exit_status
    }

    pub fn before_chunk(&self, context: &mut ChunkContext) {
        for listener in &self.chunk_listeners {
            listener.before_chunk(context);
        }
    }

    pub fn after_chunk(&self, context: &ChunkContext, elapsed: Duration) {
        for listener in &self.chunk_listeners {
            listener.after_chunk(context, elapsed);
        }
    }

    pub fn after_chunk_error(&self, context: &ChunkContext, error: &BatchError) {
        for listener in &self.chunk_listeners {
            listener.after_chunk_error(context, error);
        }
    }

    pub fn on_skip_in_read(&self, failure: &ItemFailure) {
        for listener in &self.skip_listeners {
            listener.on_skip_in_read(failure);
        }
    }

    pub fn on_skip_in_process(&self, item: &I, failure: &ItemFailure) {
        for listener in &self.skip_listeners {
            listener.on_skip_in_process(item, failure);
        }
    }

    pub fn on_skip_in_write(&self, item: &O, failure: &ItemFailure) {
        for listener in &self.skip_listeners {
            listener.on_skip_in_write(item, failure);
        }
    }
}

/// Listener reporting every lifecycle event through the `log` facade.
///
/// It can be registered for any event family; records are emitted under the
/// configured target (`partitioned_batch::listener` by default).
#[derive(Debug, Clone)]
pub struct LoggingListener {
    target: String,
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self {
            target: "partitioned_batch::listener".to_string(),
        }
    }
}

impl LoggingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(target: &str) -> Self {
        Self {
            target: target.to_string(),
        }
    }
}

impl JobExecutionListener for LoggingListener {
    fn before_job(&self, job_execution: &JobExecution) {
        info!(target: self.target.as_str(),
            "Before executing job {} (run {})",
            job_execution.job_name, job_execution.run_id
        );
    }

    fn after_job(&self, job_execution: &JobExecution) {
        info!(target: self.target.as_str(),
            "After executing job {} (run {}): {:?}",
            job_execution.job_name, job_execution.run_id, job_execution.status
        );
    }
}

impl StepExecutionListener for LoggingListener {
    fn before_step(&self, step_execution: &StepExecution) {
        info!(target: self.target.as_str(), "Preparing to execute step {}", step_execution.name);
    }

    fn after_step(&self, step_execution: &StepExecution) -> Option<ExitStatus> {
        info!(target: self.target.as_str(), "Ending executing step: {}", step_execution.summary());
        None
    }
}

impl ChunkListener for LoggingListener {
    fn before_chunk(&self, context: &mut ChunkContext) {
        info!(target: self.target.as_str(),
            "Before chunk {} of {}",
            context.chunk_number(),
            context.partition_id()
        );
    }

    fn after_chunk(&self, context: &ChunkContext, elapsed: Duration) {
        info!(target: self.target.as_str(),
            "After chunk {} of {}. millis = {}",
            context.chunk_number(),
            context.partition_id(),
            elapsed.as_millis()
        );
    }

    fn after_chunk_error(&self, context: &ChunkContext, error: &BatchError) {
        warn!(target: self.target.as_str(),
            "Chunk {} of {} finished with errors: {}",
            context.chunk_number(),
            context.partition_id(),
            error
        );
    }
}

impl<I: Debug, O: Debug> SkipListener<I, O> for LoggingListener {
    fn on_skip_in_read(&self, failure: &ItemFailure) {
        warn!(target: self.target.as_str(),
            "Skipped in read line: {}",
            failure.input.as_deref().unwrap_or("<unknown>")
        );
    }

    fn on_skip_in_process(&self, item: &I, failure: &ItemFailure) {
        warn!(target: self.target.as_str(), "Skipped in process {:?}: {}", item, failure);
    }

    fn on_skip_in_write(&self, item: &O, failure: &ItemFailure) {
        warn!(target: self.target.as_str(), "Skipped in write {:?}: {}", item, failure);
    }
}
