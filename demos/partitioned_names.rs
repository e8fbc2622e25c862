use std::{env, sync::Arc};

use log::info;
use partitioned_batch::{
    core::{
        item::{ItemSink, ItemSinkResult},
        job::{Job, JobBuilder},
        listener::LoggingListener,
        partition::MultiResourcePartitionerBuilder,
        step::StepBuilder,
    },
    error::{BatchError, FailureKind, ItemFailure},
    item::{csv::csv_source::CsvItemSourceFactory, logger::LoggerSink},
};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
struct Person {
    name: String,
    age: String,
}

/// Logs the names of each chunk and rejects any chunk holding PEDRO.
struct NamesSink {
    logger: LoggerSink,
}

impl ItemSink<Person> for NamesSink {
    fn write(&self, people: &[Person]) -> ItemSinkResult {
        if let Some(index) = people.iter().position(|person| person.name == "PEDRO") {
            let failure = ItemFailure::new(
                FailureKind::Validation,
                format!("PEDRO ({}) is not welcome", people[index].age),
            );
            return Err(failure.at_index(index));
        }

        let names: Vec<&str> = people.iter().map(|person| person.name.as_str()).collect();
        info!("{}", names.join(", "));
        self.logger.write(people)
    }
}

fn main() -> Result<(), BatchError> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let data_dir = env::var("NAMES_DIR").unwrap_or_else(|_| "demos/data".to_string());

    let partitioner = MultiResourcePartitionerBuilder::new()
        .directory(&data_dir, Some("csv"))
        .build()?;

    let factory = CsvItemSourceFactory::<Person>::new().field_names(&["name", "age"]);

    let sink = NamesSink {
        logger: LoggerSink::default(),
    };

    let listener = Arc::new(LoggingListener::new());

    let step = StepBuilder::new("slaveStep")
        .chunk::<Person>(2)
        .partitioned(&partitioner, &factory)
        .concurrency(5)
        .sink(&sink)
        .skip_limit(2)
        .skip(FailureKind::Parse)
        .skip(FailureKind::Format)
        .skip(FailureKind::Validation)
        .retry_limit(1)
        .retry(FailureKind::Validation)
        .step_listener(listener.clone())
        .chunk_listener(listener.clone())
        .skip_listener(listener.clone())
        .build()?;

    let job = JobBuilder::new()
        .name("job1".to_string())
        .start(&step)
        .listener(listener)
        .build();

    let execution = job.run()?;

    for step_execution in &execution.step_executions {
        info!("{}", step_execution.summary());
        for partition in &step_execution.partitions {
            info!("  {}", partition.summary());
        }
    }

    Ok(())
}
