use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemSink, ItemSinkResult};

/// Sink logging every item at info level.
#[derive(Default)]
pub struct LoggerSink {}

impl<T> ItemSink<T> for LoggerSink
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemSinkResult {
        items.iter().for_each(|item| info!("Record:{:?}", item));
        Ok(())
    }
}
