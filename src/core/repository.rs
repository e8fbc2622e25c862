use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use log::debug;

use super::job::JobExecution;

/// Stores the executions of jobs.
///
/// The repository hands out run identifiers and archives each execution once
/// the job ended. Implementations are shared between threads.
pub trait JobRepository: Send + Sync {
    /// Returns the next run identifier for `job_name`, starting at 1.
    fn next_run_id(&self, job_name: &str) -> u64;

    /// Archives a finished execution.
    fn save(&self, job_execution: &JobExecution);

    /// Last archived execution of `job_name`, if any.
    fn last_execution(&self, job_name: &str) -> Option<JobExecution>;
}

#[derive(Default)]
struct RepositoryState {
    run_ids: HashMap<String, u64>,
    executions: Vec<JobExecution>,
}

/// Repository keeping every execution in memory.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::repository::{InMemoryJobRepository, JobRepository};
///
/// let repository = InMemoryJobRepository::new();
///
/// assert_eq!(repository.next_run_id("import"), 1);
/// assert_eq!(repository.next_run_id("import"), 2);
/// assert_eq!(repository.next_run_id("export"), 1);
/// assert!(repository.last_execution("import").is_none());
/// ```
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every archived execution, oldest first.
    pub fn executions(&self) -> Vec<JobExecution> {
        self.lock().executions.clone()
    }

    // A panicking listener may poison the lock; the data stays consistent.
    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobRepository for InMemoryJobRepository {
    fn next_run_id(&self, job_name: &str) -> u64 {
        let mut state = self.lock();
        let run_id = state.run_ids.entry(job_name.to_string()).or_insert(0);
        *run_id += 1;
        *run_id
    }

    fn save(&self, job_execution: &JobExecution) {
        debug!(
            "Saving execution {} of job {} (run {})",
            job_execution.id, job_execution.job_name, job_execution.run_id
        );
        self.lock().executions.push(job_execution.clone());
    }

    fn last_execution(&self, job_name: &str) -> Option<JobExecution> {
        self.lock()
            .executions
            .iter()
            .rev()
            .find(|execution| execution.job_name == job_name)
            .cloned()
    }
}
