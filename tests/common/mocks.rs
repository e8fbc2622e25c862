//! Mock sinks.
use mockall::mock;

use partitioned_batch::core::item::{ItemSink, ItemSinkResult};

use super::Person;

mock! {
    pub Sink {}
    impl ItemSink<Person> for Sink {
        fn write(&self, items: &[Person]) -> ItemSinkResult;
    }
}
