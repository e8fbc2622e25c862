#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Partitioned Batch

 A chunk-oriented batch processing core with partitioning and fault tolerance.

 A step reads items one at a time from an `ItemSource`, optionally maps each
 one through an `ItemTransform`, and hands fixed-size chunks of results to an
 `ItemSink`. A step can be partitioned: a `Partitioner` splits its input into
 independent slices, each described by an `ExecutionContext`, and a bounded
 worker pool runs one chunk loop per slice. The counters of all partitions
 are added up into the step execution.

 ## Core Concepts

- **Job:** an ordered list of steps, stopped by the first step that fails.
- **Step:** a chunk-oriented unit of work, singular or partitioned.
- **Partitioner:** splits the input of a step into named partition contexts.
- **ItemSource / ItemTransform / ItemSink:** read, map and write items.
- **FaultPolicy:** decides whether a failed item is retried, skipped or
  stops the partition. Skips are budgeted per partition.
- **Listeners:** observe jobs, steps, chunks and skipped items.

 ## Features

| **Feature** | **Description**                                              |
|-------------|--------------------------------------------------------------|
| csv         | Enables the CSV `ItemSource` and its per-partition factory   |
| logger      | Enables a logger `ItemSink`, useful for debugging purposes   |
| full        | Enables all available features                               |

 ## Getting Started

```rust
# use partitioned_batch::{
#     core::{
#         context::ExecutionContext,
#         item::{ItemSink, ItemSinkResult, ItemSource, ItemSourceResult},
#         job::{Job, JobBuilder},
#         partition::RangePartitioner,
#         step::{BatchStatus, StepBuilder},
#     },
#     BatchError, FailureKind, ItemFailure,
# };
# use std::{cell::Cell, sync::Mutex};
struct Range {
    next: Cell<i64>,
    max: i64,
}

impl ItemSource<i64> for Range {
    fn read(&self) -> ItemSourceResult<i64> {
        let current = self.next.get();
        if current > self.max {
            return Ok(None);
        }
        self.next.set(current + 1);
        Ok(Some(current))
    }
}

#[derive(Default)]
struct Squares(Mutex<i64>);

impl ItemSink<i64> for Squares {
    fn write(&self, items: &[i64]) -> ItemSinkResult {
        if let Some(index) = items.iter().position(|item| *item == 13) {
            return Err(ItemFailure::new(FailureKind::Validation, "unlucky").at_index(index));
        }
        *self.0.lock().unwrap() += items.iter().map(|item| item * item).sum::<i64>();
        Ok(())
    }
}

fn range(context: &ExecutionContext) -> Result<Box<dyn ItemSource<i64>>, BatchError> {
    Ok(Box::new(Range {
        next: Cell::new(context.get_int("minValue").unwrap_or(0)),
        max: context.get_int("maxValue").unwrap_or(-1),
    }))
}

fn main() -> Result<(), BatchError> {
    let partitioner = RangePartitioner::new(1, 20);
    let sink = Squares::default();

    let step = StepBuilder::new("squares")
        .chunk::<i64>(3)
        .partitioned(&partitioner, &range)
        .concurrency(4)
        .sink(&sink)
        .skip_limit(1)
        .skip(FailureKind::Validation)
        .build()?;

    let job = JobBuilder::new().name("sum-of-squares".to_string()).start(&step).build();
    let execution = job.run()?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.step_executions[0].write_skip_count, 1);
    assert_eq!(*sink.0.lock().unwrap(), (1..=20).map(|i| i * i).sum::<i64>() - 169);

    Ok(())
}
```

 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Item sources and sinks (for example: csv source, logger sink)
pub mod item;
