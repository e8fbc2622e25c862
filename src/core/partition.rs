//! Splitting one step into independent partitions.
//!
//! A [`Partitioner`] turns the input of a step into named
//! [`ExecutionContext`]s, `partition0`, `partition1`, … Each context fully
//! describes one slice of the input and is handed to the worker that
//! processes it. Contexts never overlap and together they cover the whole
//! input.
//!
//! Two partitioners are provided:
//!
//! - [`MultiResourcePartitioner`]: one partition per input file, the file
//!   location stored under a configurable key (`fileName` by default)
//! - [`RangePartitioner`]: contiguous slices of an integer range, stored under
//!   `minValue` / `maxValue`

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::debug;

use crate::error::BatchError;

use super::{config::StepConfig, context::ExecutionContext};

/// Context key holding the input location of a resource partition.
pub const DEFAULT_KEY_NAME: &str = "fileName";

const PARTITION_KEY: &str = "partition";

/// Partitions by name, in partition order.
pub type Partitions = IndexMap<String, ExecutionContext>;

/// Name of the partition at `index`.
pub fn partition_name(index: usize) -> String {
    format!("{}{}", PARTITION_KEY, index)
}

/// Splits the input of a step into partitions.
pub trait Partitioner {
    /// Creates the partitions.
    ///
    /// `grid_size` is the number of workers available; it is advisory and a
    /// partitioner may return fewer or more partitions. An empty result means
    /// there is nothing to process.
    fn partition(&self, grid_size: usize) -> Result<Partitions, BatchError>;
}

/// Creates one partition per resource.
///
/// Partition indexes follow the order of the resources, so the same resources
/// always produce the same partitions.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::partition::{MultiResourcePartitionerBuilder, Partitioner};
///
/// let partitioner = MultiResourcePartitionerBuilder::new()
///     .resource("data/names0.csv")
///     .resource("data/names1.csv")
///     .build()
///     .unwrap();
///
/// let partitions = partitioner.partition(5).unwrap();
///
/// assert_eq!(partitions.len(), 2);
/// assert_eq!(partitions["partition0"].get_string("fileName"), Some("data/names0.csv"));
/// assert_eq!(partitions["partition1"].get_string("fileName"), Some("data/names1.csv"));
/// ```
#[derive(Debug, Clone)]
pub struct MultiResourcePartitioner {
    resources: Vec<PathBuf>,
    key_name: String,
}

impl MultiResourcePartitioner {
    pub fn resources(&self) -> &[PathBuf] {
        &self.resources
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }
}

impl Partitioner for MultiResourcePartitioner {
    fn partition(&self, grid_size: usize) -> Result<Partitions, BatchError> {
        debug!(
            "Partitioning {} resources (grid size {})",
            self.resources.len(),
            grid_size
        );

        let partitions = self
            .resources
            .iter()
            .enumerate()
            .map(|(index, resource)| {
                let mut context = ExecutionContext::new();
                context.put_string(&self.key_name, resource.to_string_lossy());
                (partition_name(index), context)
            })
            .collect();

        Ok(partitions)
    }
}

/// Builder for [`MultiResourcePartitioner`].
#[derive(Debug, Default)]
pub struct MultiResourcePartitionerBuilder {
    resources: Vec<PathBuf>,
    directories: Vec<(PathBuf, Option<String>)>,
    key_name: Option<String>,
}

impl MultiResourcePartitionerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one resource.
    pub fn resource<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.resources.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds several resources, keeping their order.
    pub fn resources<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.resources
            .extend(paths.into_iter().map(|path| path.as_ref().to_path_buf()));
        self
    }

    /// Adds every file of `directory`, optionally only those with the given
    /// extension. Files are sorted by path when the partitioner is built.
    pub fn directory<P: AsRef<Path>>(mut self, directory: P, extension: Option<&str>) -> Self {
        self.directories.push((
            directory.as_ref().to_path_buf(),
            extension.map(str::to_string),
        ));
        self
    }

    /// Sets the context key holding the resource location.
    pub fn key_name(mut self, key_name: &str) -> Self {
        self.key_name = Some(key_name.to_string());
        self
    }

    /// Takes the context key from `config.partition_key`.
    pub fn config(self, config: &StepConfig) -> Self {
        self.key_name(&config.partition_key)
    }

    /// Builds the partitioner.
    ///
    /// # Errors
    /// - `BatchError::Io` when a directory cannot be listed
    /// - `BatchError::Configuration` when a resource is given twice or the
    ///   key name is empty
    pub fn build(self) -> Result<MultiResourcePartitioner, BatchError> {
        let mut resources = self.resources;

        for (directory, extension) in &self.directories {
            let mut files = list_files(directory, extension.as_deref())?;
            files.sort();
            resources.extend(files);
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = resources.iter().find(|resource| !seen.insert(*resource)) {
            return Err(BatchError::Configuration(format!(
                "resource {} is listed more than once",
                duplicate.display()
            )));
        }

        let key_name = self.key_name.unwrap_or_else(|| DEFAULT_KEY_NAME.to_string());
        if key_name.is_empty() {
            return Err(BatchError::Configuration(
                "partition key name must not be empty".to_string(),
            ));
        }

        Ok(MultiResourcePartitioner {
            resources,
            key_name,
        })
    }
}

fn list_files(directory: &Path, extension: Option<&str>) -> Result<Vec<PathBuf>, BatchError> {
    let mut files = Vec::new();

    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = match extension {
            Some(extension) => path
                .extension()
                .is_some_and(|actual| actual.eq_ignore_ascii_case(extension)),
            None => true,
        };
        if matches {
            files.push(path);
        }
    }

    Ok(files)
}

/// Splits an inclusive integer range into `grid_size` contiguous slices.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::partition::{Partitioner, RangePartitioner};
///
/// let partitioner = RangePartitioner::new(1, 10);
/// let partitions = partitioner.partition(3).unwrap();
///
/// let bounds: Vec<(i64, i64)> = partitions
///     .values()
///     .map(|context| {
///         (
///             context.get_int("minValue").unwrap(),
///             context.get_int("maxValue").unwrap(),
///         )
///     })
///     .collect();
///
/// assert_eq!(bounds, vec![(1, 4), (5, 8), (9, 10)]);
/// ```
#[derive(Debug, Clone)]
pub struct RangePartitioner {
    min: i64,
    max: i64,
    min_key: String,
    max_key: String,
}

impl RangePartitioner {
    pub fn new(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            min_key: "minValue".to_string(),
            max_key: "maxValue".to_string(),
        }
    }

    pub fn keys(mut self, min_key: &str, max_key: &str) -> Self {
        self.min_key = min_key.to_string();
        self.max_key = max_key.to_string();
        self
    }
}

impl Partitioner for RangePartitioner {
    fn partition(&self, grid_size: usize) -> Result<Partitions, BatchError> {
        let mut partitions = Partitions::new();
        if self.min > self.max {
            return Ok(partitions);
        }

        let total = i128::from(self.max) - i128::from(self.min) + 1;
        let grid_size = i128::try_from(grid_size.max(1)).unwrap_or(i128::MAX);
        let slice = (total + grid_size - 1) / grid_size;

        let mut start = i128::from(self.min);
        let end = i128::from(self.max);
        let mut index = 0;

        while start <= end {
            let stop = (start + slice - 1).min(end);
            let mut context = ExecutionContext::new();
            // both bounds lie within [min, max]
            context.put_int(&self.min_key, start as i64);
            context.put_int(&self.max_key, stop as i64);
            partitions.insert(partition_name(index), context);

            start = stop + 1;
            index += 1;
        }

        Ok(partitions)
    }
}
