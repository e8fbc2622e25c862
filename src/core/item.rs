use crate::error::{BatchError, ItemFailure};

use super::context::ExecutionContext;

/// Result of reading one item: `Ok(None)` signals that the source is exhausted.
pub type ItemSourceResult<I> = Result<Option<I>, ItemFailure>;

/// Result of transforming one item: `Ok(None)` filters the item out.
pub type ItemTransformResult<O> = Result<Option<O>, ItemFailure>;

/// Result of writing one chunk.
pub type ItemSinkResult = Result<(), ItemFailure>;

/// Produces the items of one partition, one at a time.
///
/// Sources use `&self` receivers; implementations keep their cursor behind a
/// `Cell` or `RefCell`. A source is created and consumed by a single worker,
/// so it does not have to be `Sync`.
pub trait ItemSource<I> {
    /// Called once before the first `read`.
    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    /// Reads the next item.
    ///
    /// # Returns
    /// - `Ok(Some(item))` when an item is available
    /// - `Ok(None)` when the source is exhausted
    /// - `Err(ItemFailure)` when the current record cannot be read; the next
    ///   call moves on to the following record
    fn read(&self) -> ItemSourceResult<I>;

    /// Called once after the last `read`, whatever the outcome.
    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Builds the `ItemSource` of a partition from its execution context.
///
/// Factories are shared by all workers of a partitioned step. Any
/// `Fn(&ExecutionContext) -> Result<Box<dyn ItemSource<I>>, BatchError>`
/// closure is a factory.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::context::ExecutionContext;
/// use partitioned_batch::core::item::{ItemSource, ItemSourceFactory, ItemSourceResult};
/// use partitioned_batch::BatchError;
/// use std::cell::Cell;
///
/// struct Countdown(Cell<i64>);
///
/// impl ItemSource<i64> for Countdown {
///     fn read(&self) -> ItemSourceResult<i64> {
///         let current = self.0.get();
///         if current == 0 {
///             return Ok(None);
///         }
///         self.0.set(current - 1);
///         Ok(Some(current))
///     }
/// }
///
/// let factory = |context: &ExecutionContext| -> Result<Box<dyn ItemSource<i64>>, BatchError> {
///     let start = context.get_int("start").unwrap_or(0);
///     Ok(Box::new(Countdown(Cell::new(start))))
/// };
///
/// let mut context = ExecutionContext::new();
/// context.put_int("start", 2);
///
/// let source = factory.create(&context).unwrap();
/// assert_eq!(source.read().unwrap(), Some(2));
/// assert_eq!(source.read().unwrap(), Some(1));
/// assert_eq!(source.read().unwrap(), None);
/// ```
pub trait ItemSourceFactory<I>: Sync {
    fn create(&self, context: &ExecutionContext) -> Result<Box<dyn ItemSource<I>>, BatchError>;
}

impl<I, F> ItemSourceFactory<I> for F
where
    F: Fn(&ExecutionContext) -> Result<Box<dyn ItemSource<I>>, BatchError> + Sync,
{
    fn create(&self, context: &ExecutionContext) -> Result<Box<dyn ItemSource<I>>, BatchError> {
        self(context)
    }
}

/// Maps one item to zero or one output item.
pub trait ItemTransform<I, O> {
    /// Transforms `item`.
    ///
    /// The same item may be handed over several times when the failure it
    /// produced is retryable, so implementations must not consume it.
    fn process(&self, item: &I) -> ItemTransformResult<O>;
}

/// Transform returning a copy of its input.
#[derive(Default, Debug, Clone, Copy)]
pub struct PassThroughTransform;

impl<T: Clone> ItemTransform<T, T> for PassThroughTransform {
    fn process(&self, item: &T) -> ItemTransformResult<T> {
        Ok(Some(item.clone()))
    }
}

/// Accepts a chunk of items and commits it as a unit.
///
/// A sink is shared by every partition of a step, hence the `&self`
/// receivers: implementations synchronize their own state.
pub trait ItemSink<O> {
    /// Writes the chunk.
    ///
    /// When the failure concerns one item of the chunk, the sink should report
    /// its position with [`ItemFailure::at_index`]; only then can that item be
    /// skipped while the rest of the chunk is committed.
    fn write(&self, items: &[O]) -> ItemSinkResult;

    /// Called once before any partition starts.
    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    /// Called once after every partition ended.
    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_should_copy_the_item() {
        let transform = PassThroughTransform;
        let result = transform.process(&"Alice".to_string());
        assert_eq!(result, Ok(Some("Alice".to_string())));
    }
}
