use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{error, info};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    listener::{JobExecutionListener, JobListenerRegistry},
    repository::{InMemoryJobRepository, JobRepository},
    step::{BatchStatus, ExitStatus, Step, StepExecution},
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// Represents a job that can be executed.
///
/// A job is a sequence of steps executed in order. The first step that fails
/// stops the job.
pub trait Job {
    /// Runs the job and returns the result of the job execution.
    ///
    /// # Returns
    /// - `Ok(JobExecution)` when every step completed
    /// - `Err(BatchError::Step)` naming the step that failed; the failed
    ///   execution is still archived in the job repository
    fn run(&self) -> JobResult<JobExecution>;
}

/// Represents one run of a job.
#[derive(Debug, Clone)]
pub struct JobExecution {
    /// Unique identifier of this execution
    pub id: Uuid,
    pub job_name: String,
    /// Run number of the job, incremented on each launch
    pub run_id: u64,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// The total duration of the job execution
    pub duration: Duration,
    /// Executions of the steps that ran, in order
    pub step_executions: Vec<StepExecution>,
    pub failure: Option<String>,
}

impl JobExecution {
    fn new(job_name: &str, run_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            run_id,
            status: BatchStatus::Started,
            exit_status: ExitStatus::new(ExitStatus::EXECUTING),
            start_time: Utc::now(),
            end_time: None,
            duration: Duration::ZERO,
            step_executions: Vec::new(),
            failure: None,
        }
    }

    /// Execution of the step named `name`, if it ran.
    pub fn step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|step_execution| step_execution.name == name)
    }
}

/// Represents an instance of a job.
///
/// A job instance is created through the `JobBuilder` and executed by calling
/// the `run` method. The steps are executed in the order they were added.
pub struct JobInstance<'a> {
    /// Unique identifier for this job instance
    id: Uuid,
    /// Human-readable name for the job
    name: String,
    /// Collection of steps that make up this job, in execution order
    steps: Vec<&'a dyn Step>,
    listeners: JobListenerRegistry,
    repository: Arc<dyn JobRepository>,
}

impl JobInstance<'_> {
    pub fn get_name(&self) -> &str {
        &self.name
    }
}

impl Job for JobInstance<'_> {
    fn run(&self) -> JobResult<JobExecution> {
        let start = Instant::now();
        let run_id = self.repository.next_run_id(&self.name);
        let mut job_execution = JobExecution::new(&self.name, run_id);

        info!(
            "Start of job: {}, id: {}, run: {}",
            self.name, self.id, run_id
        );

        self.listeners.before_job(&job_execution);

        let mut failed_step = None;
        for step in &self.steps {
            let mut step_execution = StepExecution::new(step.get_name());
            let result = step.execute(&mut step_execution);
            job_execution.step_executions.push(step_execution);

            if let Err(step_error) = result {
                error!(
                    "Job {} stopped: step {} failed: {}",
                    self.name,
                    step.get_name(),
                    step_error
                );
                job_execution.failure = Some(step_error.to_string());
                failed_step = Some(step.get_name().to_owned());
                break;
            }
        }

        job_execution.end_time = Some(Utc::now());
        job_execution.duration = start.elapsed();
        match &failed_step {
            None => {
                job_execution.status = BatchStatus::Completed;
                job_execution.exit_status = ExitStatus::completed();
            }
            Some(step_name) => {
                job_execution.status = BatchStatus::Failed;
                job_execution.exit_status =
                    ExitStatus::failed().with_description(&format!("step {} failed", step_name));
            }
        }

        self.listeners.after_job(&job_execution);
        self.repository.save(&job_execution);

        info!(
            "End of job: {}, id: {}, status: {:?}",
            self.name, self.id, job_execution.status
        );

        match failed_step {
            None => Ok(job_execution),
            Some(step_name) => Err(BatchError::Step(step_name)),
        }
    }
}

/// Builder for creating a job instance.
///
/// # Example
///
/// ```
/// use partitioned_batch::core::item::{ItemSink, ItemSinkResult, ItemSource, ItemSourceResult};
/// use partitioned_batch::core::job::{Job, JobBuilder};
/// use partitioned_batch::core::step::{BatchStatus, StepBuilder};
///
/// struct Empty;
///
/// impl ItemSource<String> for Empty {
///     fn read(&self) -> ItemSourceResult<String> {
///         Ok(None)
///     }
/// }
///
/// struct Discard;
///
/// impl ItemSink<String> for Discard {
///     fn write(&self, _items: &[String]) -> ItemSinkResult {
///         Ok(())
///     }
/// }
///
/// let step = StepBuilder::new("copy")
///     .chunk::<String>(10)
///     .source(&Empty)
///     .sink(&Discard)
///     .build()
///     .unwrap();
///
/// let job = JobBuilder::new().name("import".to_string()).start(&step).build();
/// let execution = job.run().unwrap();
///
/// assert_eq!(execution.status, BatchStatus::Completed);
/// assert_eq!(execution.run_id, 1);
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Collection of steps to be executed, in order
    steps: Vec<&'a dyn Step>,
    listeners: JobListenerRegistry,
    repository: Option<Arc<dyn JobRepository>>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: String) -> JobBuilder<'a> {
        self.name = Some(name);
        self
    }

    /// Sets the first step of the job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to the job. Steps are executed in the order they are added.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn JobExecutionListener>) -> JobBuilder<'a> {
        self.listeners.register(listener);
        self
    }

    /// Sets the repository archiving the executions. An in-memory repository
    /// is used when none is given.
    pub fn repository(mut self, repository: Arc<dyn JobRepository>) -> JobBuilder<'a> {
        self.repository = Some(repository);
        self
    }

    /// Builds the job. If no name has been provided, a random name is generated.
    pub fn build(self) -> JobInstance<'a> {
        JobInstance {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            listeners: self.listeners,
            repository: self
                .repository
                .unwrap_or_else(|| Arc::new(InMemoryJobRepository::new())),
        }
    }
}
