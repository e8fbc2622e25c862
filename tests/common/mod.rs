#![allow(dead_code)]

pub mod mocks;

use std::{
    cell::RefCell,
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Deserialize;

use partitioned_batch::{
    core::{
        item::{ItemSink, ItemSinkResult, ItemSource, ItemSourceResult},
        job::JobExecution,
        listener::{
            ChunkContext, ChunkListener, JobExecutionListener, SkipListener,
            StepExecutionListener,
        },
        step::{ExitStatus, StepExecution},
    },
    BatchError, FailureKind, ItemFailure,
};

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: String,
}

impl Person {
    pub fn new(name: &str, age: u32) -> Self {
        Self {
            name: name.to_string(),
            age: age.to_string(),
        }
    }
}

/// In-memory source replaying a script of read results.
pub struct PersonSource(RefCell<VecDeque<ItemSourceResult<Person>>>);

impl PersonSource {
    pub fn new(script: Vec<ItemSourceResult<Person>>) -> Self {
        Self(RefCell::new(script.into()))
    }

    /// Source of people named `names`.
    pub fn of(names: &[&str]) -> Self {
        Self::new(
            names
                .iter()
                .enumerate()
                .map(|(age, name)| Ok(Some(Person::new(name, age as u32))))
                .collect(),
        )
    }
}

impl ItemSource<Person> for PersonSource {
    fn read(&self) -> ItemSourceResult<Person> {
        self.0.borrow_mut().pop_front().unwrap_or(Ok(None))
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writes `lines` to `dir/name` and returns the file path.
pub fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content).unwrap();
    path
}

/// Sink keeping every committed chunk; fails on items named `reject`.
#[derive(Default)]
pub struct CollectingSink {
    pub chunks: Mutex<Vec<Vec<String>>>,
    pub calls: Mutex<usize>,
    pub reject: Option<&'static str>,
}

impl CollectingSink {
    pub fn rejecting(name: &'static str) -> Self {
        Self {
            reject: Some(name),
            ..Default::default()
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chunks.lock().unwrap().concat();
        names.sort();
        names
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ItemSink<Person> for CollectingSink {
    fn write(&self, items: &[Person]) -> ItemSinkResult {
        *self.calls.lock().unwrap() += 1;
        if let Some(reject) = self.reject {
            if let Some(index) = items.iter().position(|person| person.name == reject) {
                return Err(
                    ItemFailure::new(FailureKind::Validation, "rejected").at_index(index)
                );
            }
        }
        self.chunks
            .lock()
            .unwrap()
            .push(items.iter().map(|person| person.name.clone()).collect());
        Ok(())
    }
}

/// Listener recording every lifecycle event it receives, in order.
#[derive(Default, Clone)]
pub struct EventRecorder {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(event)).count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl JobExecutionListener for EventRecorder {
    fn before_job(&self, _job_execution: &JobExecution) {
        self.push("before_job".to_string());
    }

    fn after_job(&self, job_execution: &JobExecution) {
        self.push(format!("after_job:{:?}", job_execution.status));
    }
}

impl StepExecutionListener for EventRecorder {
    fn before_step(&self, step_execution: &StepExecution) {
        self.push(format!("before_step:{}", step_execution.name));
    }

    fn after_step(&self, step_execution: &StepExecution) -> Option<ExitStatus> {
        self.push(format!(
            "after_step:{}:{:?}",
            step_execution.name, step_execution.status
        ));
        None
    }
}

impl ChunkListener for EventRecorder {
    fn before_chunk(&self, context: &mut ChunkContext) {
        self.push(format!("before_chunk:{}", context.partition_id()));
    }

    fn after_chunk(&self, context: &ChunkContext, _elapsed: Duration) {
        self.push(format!("after_chunk:{}", context.partition_id()));
    }

    fn after_chunk_error(&self, context: &ChunkContext, _error: &BatchError) {
        self.push(format!("after_chunk_error:{}", context.partition_id()));
    }
}

impl SkipListener<Person, Person> for EventRecorder {
    fn on_skip_in_read(&self, failure: &ItemFailure) {
        self.push(format!(
            "skip_in_read:{}",
            failure.input.clone().unwrap_or_default()
        ));
    }

    fn on_skip_in_process(&self, item: &Person, _failure: &ItemFailure) {
        self.push(format!("skip_in_process:{}", item.name));
    }

    fn on_skip_in_write(&self, item: &Person, _failure: &ItemFailure) {
        self.push(format!("skip_in_write:{}", item.name));
    }
}
