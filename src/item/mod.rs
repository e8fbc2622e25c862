#[cfg(feature = "logger")]
/// This module provides a sink logging each item, useful for debugging purposes.
pub mod logger;

#[cfg(feature = "csv")]
/// This module provides a CSV item source and its per-partition factory.
pub mod csv;
