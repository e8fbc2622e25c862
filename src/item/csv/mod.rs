/// CSV input for chunk-oriented steps.
///
/// [`csv_source::CsvItemSource`] deserializes delimited records into Rust
/// structs with serde and reports malformed lines as skippable item failures.
/// [`csv_source::CsvItemSourceFactory`] opens one source per partition, from
/// the file path stored in the partition context.
pub mod csv_source;
