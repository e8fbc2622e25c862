use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Mutex, mpsc},
    thread,
};

use indexmap::IndexMap;
use log::{debug, error};

use crate::error::BatchError;

use super::{context::ExecutionContext, partition::Partitions, step::StepExecution};

/// Terminal result of one partition.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    /// Name of the partition, as given by the partitioner
    pub name: String,
    /// Execution holding the counters of the partition
    pub execution: StepExecution,
    /// Fatal error that stopped the partition
    pub error: Option<BatchError>,
}

impl PartitionOutcome {
    pub fn new(name: &str, execution: StepExecution, error: Option<BatchError>) -> Self {
        Self {
            name: name.to_string(),
            execution,
            error,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    fn aborted(name: &str, reason: String) -> Self {
        let error = BatchError::Worker(reason);
        let mut execution = StepExecution::new(name);
        execution.finish(&Err(error.clone()));
        Self::new(name, execution, Some(error))
    }
}

/// Runs partitions on a bounded set of worker threads.
///
/// At most `concurrency` partitions run at the same time; the others wait in
/// a queue until a worker is free. Workers never share mutable state: each
/// one sends the outcome of its partition to the calling thread over a
/// channel.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::context::ExecutionContext;
/// use partitioned_batch::core::partition::Partitions;
/// use partitioned_batch::core::pool::{PartitionOutcome, WorkerPool};
/// use partitioned_batch::core::step::StepExecution;
///
/// let mut partitions = Partitions::new();
/// for index in 0..3 {
///     let mut context = ExecutionContext::new();
///     context.put_int("size", index);
///     partitions.insert(format!("partition{}", index), context);
/// }
///
/// let pool = WorkerPool::new(2).unwrap();
/// let outcomes = pool.run(partitions, |name, context| {
///     let mut execution = StepExecution::new(name);
///     execution.read_count = context.get_int("size").unwrap_or(0) as usize;
///     PartitionOutcome::new(name, execution, None)
/// });
///
/// let total: usize = outcomes.values().map(|outcome| outcome.execution.read_count).sum();
/// assert_eq!(total, 3);
/// assert_eq!(outcomes.keys().collect::<Vec<_>>(), vec!["partition0", "partition1", "partition2"]);
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    /// Creates a pool of `concurrency` workers.
    ///
    /// # Errors
    /// `BatchError::Configuration` when `concurrency` is zero.
    pub fn new(concurrency: usize) -> Result<Self, BatchError> {
        if concurrency == 0 {
            return Err(BatchError::Configuration(
                "worker concurrency must be positive".to_string(),
            ));
        }
        Ok(Self { concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `work` once per partition and waits for all of them.
    ///
    /// A partition that fails or panics does not stop the others. The
    /// outcomes are returned in partition order.
    pub fn run<F>(&self, partitions: Partitions, work: F) -> IndexMap<String, PartitionOutcome>
    where
        F: Fn(&str, &ExecutionContext) -> PartitionOutcome + Sync,
    {
        let names: Vec<String> = partitions.keys().cloned().collect();
        let workers = self.concurrency.min(names.len());
        let queue = Mutex::new(partitions.into_iter());
        let (sender, receiver) = mpsc::channel::<PartitionOutcome>();

        debug!(
            "Running {} partitions on {} workers",
            names.len(),
            workers
        );

        thread::scope(|scope| {
            for worker in 0..workers {
                let sender = sender.clone();
                let queue = &queue;
                let work = &work;

                let spawned = thread::Builder::new()
                    .name(format!("batch-worker-{}", worker))
                    .spawn_scoped(scope, move || {
                        loop {
                            let next = queue.lock().ok().and_then(|mut queue| queue.next());
                            let Some((name, context)) = next else {
                                break;
                            };

                            let outcome =
                                panic::catch_unwind(AssertUnwindSafe(|| work(&name, &context)))
                                    .unwrap_or_else(|payload| {
                                        error!("Partition {} panicked", name);
                                        PartitionOutcome::aborted(&name, panic_message(&name, payload))
                                    });

                            if sender.send(outcome).is_err() {
                                break;
                            }
                        }
                    });

                if let Err(spawn_error) = spawned {
                    error!("Unable to start worker {}: {}", worker, spawn_error);
                }
            }
        });
        drop(sender);

        let mut outcomes: HashMap<String, PartitionOutcome> = receiver
            .into_iter()
            .map(|outcome| (outcome.name.clone(), outcome))
            .collect();

        names
            .into_iter()
            .map(|name| {
                let outcome = outcomes.remove(&name).unwrap_or_else(|| {
                    PartitionOutcome::aborted(&name, format!("partition {} was never executed", name))
                });
                (name, outcome)
            })
            .collect()
    }
}

fn panic_message(name: &str, payload: Box<dyn Any + Send>) -> String {
    let cause = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("partition {} panicked: {}", name, cause)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    use super::*;

    fn partitions(count: usize) -> Partitions {
        (0..count)
            .map(|index| (format!("partition{}", index), ExecutionContext::new()))
            .collect()
    }

    #[test]
    fn should_reject_zero_concurrency() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(BatchError::Configuration(_))
        ));
    }

    #[test]
    fn should_never_exceed_concurrency() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let pool = WorkerPool::new(2).unwrap();

        let outcomes = pool.run(partitions(6), |name, _context| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            PartitionOutcome::new(name, StepExecution::new(name), None)
        });

        assert_eq!(outcomes.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn partitions_should_run_concurrently() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let pool = WorkerPool::new(5).unwrap();

        let outcomes = pool.run(partitions(2), |name, _context| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            // wait for the sibling, at most five seconds
            let deadline = Instant::now() + Duration::from_secs(5);
            while peak.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            running.fetch_sub(1, Ordering::SeqCst);
            PartitionOutcome::new(name, StepExecution::new(name), None)
        });

        assert_eq!(outcomes.len(), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_partition_should_not_cancel_siblings() {
        let pool = WorkerPool::new(3).unwrap();

        let outcomes = pool.run(partitions(3), |name, _context| {
            if name == "partition1" {
                panic!("boom");
            }
            thread::sleep(Duration::from_millis(10));
            let mut execution = StepExecution::new(name);
            execution.read_count = 1;
            PartitionOutcome::new(name, execution, None)
        });

        assert!(!outcomes["partition0"].is_failed());
        assert!(outcomes["partition1"].is_failed());
        assert!(!outcomes["partition2"].is_failed());
        assert_eq!(outcomes["partition2"].execution.read_count, 1);
        assert!(matches!(
            &outcomes["partition1"].error,
            Some(BatchError::Worker(message)) if message.contains("boom")
        ));
    }

    #[test]
    fn should_return_empty_outcomes_for_no_partition() {
        let pool = WorkerPool::new(4).unwrap();
        let outcomes = pool.run(Partitions::new(), |name, _context| {
            PartitionOutcome::new(name, StepExecution::new(name), None)
        });
        assert!(outcomes.is_empty());
    }
}
