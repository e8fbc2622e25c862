use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::Read,
    marker::PhantomData,
    path::Path,
};

use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use log::debug;
use serde::de::DeserializeOwned;

use crate::{
    core::{
        config::StepConfig,
        context::ExecutionContext,
        item::{ItemSource, ItemSourceFactory, ItemSourceResult},
        partition::DEFAULT_KEY_NAME,
    },
    error::{BatchError, FailureKind, ItemFailure},
};

/// A CSV item source deserializing one record per `read`.
///
/// Records are trimmed and mapped with serde, by header or field name when
/// known, by position otherwise. Every record must have as many fields as
/// the header (or the configured field names, or the first record):
///
/// - a record with another field count fails with [`FailureKind::Format`]
/// - a record that cannot be deserialized fails with [`FailureKind::Parse`]
///
/// Both failures carry the raw record as input and leave the source on the
/// next record, so they can be skipped.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::item::ItemSource;
/// use partitioned_batch::item::csv::csv_source::CsvItemSourceBuilder;
/// use partitioned_batch::FailureKind;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct Person {
///     name: String,
///     age: u8,
/// }
///
/// let data = "Alice,30\nBob\nPEDRO,41\n";
///
/// let source = CsvItemSourceBuilder::new()
///     .field_names(&["name", "age"])
///     .from_reader(data.as_bytes());
///
/// let alice: Option<Person> = source.read().unwrap();
/// assert_eq!(alice.unwrap().name, "Alice");
///
/// let bob: Result<Option<Person>, _> = source.read();
/// let failure = bob.unwrap_err();
/// assert_eq!(failure.kind, FailureKind::Format);
/// assert_eq!(failure.input.as_deref(), Some("Bob"));
///
/// let pedro: Option<Person> = source.read().unwrap();
/// assert_eq!(pedro.unwrap().age, 41);
/// ```
pub struct CsvItemSource<R> {
    reader: RefCell<Reader<R>>,
    has_headers: bool,
    field_names: Option<StringRecord>,
    expected_len: Cell<Option<usize>>,
    delimiter: u8,
}

impl<R: Read> CsvItemSource<R> {
    fn raw_line(&self, record: &StringRecord) -> String {
        let delimiter = char::from(self.delimiter).to_string();
        record.iter().collect::<Vec<_>>().join(&delimiter)
    }
}

impl<R: Read, T: DeserializeOwned> ItemSource<T> for CsvItemSource<R> {
    fn read(&self) -> ItemSourceResult<T> {
        let mut reader = self.reader.borrow_mut();
        let mut record = StringRecord::new();

        if !reader.read_record(&mut record).map_err(csv_failure)? {
            return Ok(None);
        }

        let line = record.position().map(|position| position.line());

        let headers = if self.has_headers {
            Some(reader.headers().map_err(csv_failure)?)
        } else {
            self.field_names.as_ref()
        };

        let expected_len = match headers.map(StringRecord::len).or(self.expected_len.get()) {
            Some(expected_len) => expected_len,
            None => {
                self.expected_len.set(Some(record.len()));
                record.len()
            }
        };

        if record.len() != expected_len {
            return Err(ItemFailure::new(
                FailureKind::Format,
                format!(
                    "expected {} fields but found {} at line {}",
                    expected_len,
                    record.len(),
                    line.unwrap_or_default()
                ),
            )
            .with_input(self.raw_line(&record)));
        }

        record
            .deserialize(headers)
            .map(Some)
            .map_err(|error| {
                ItemFailure::new(FailureKind::Parse, error.to_string())
                    .with_input(self.raw_line(&record))
            })
    }
}

fn csv_failure(error: csv::Error) -> ItemFailure {
    let kind = if error.is_io_error() {
        FailureKind::Io
    } else {
        FailureKind::Parse
    };
    ItemFailure::new(kind, error.to_string())
}

/// Builder for [`CsvItemSource`].
#[derive(Debug, Clone)]
pub struct CsvItemSourceBuilder {
    delimiter: u8,
    has_headers: bool,
    field_names: Option<Vec<String>>,
}

impl Default for CsvItemSourceBuilder {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: false,
            field_names: None,
        }
    }
}

impl CsvItemSourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Treats the first record as the header.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    /// Names the fields of headerless input.
    pub fn field_names(mut self, names: &[&str]) -> Self {
        self.field_names = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            // field counts are checked per record so that one bad line can be skipped
            .flexible(true);
        builder
    }

    fn build<R: Read>(self, reader: Reader<R>) -> CsvItemSource<R> {
        CsvItemSource {
            reader: RefCell::new(reader),
            has_headers: self.has_headers,
            field_names: self.field_names.map(StringRecord::from),
            expected_len: Cell::new(None),
            delimiter: self.delimiter,
        }
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemSource<R> {
        let reader = self.reader_builder().from_reader(rdr);
        self.build(reader)
    }

    /// Opens the file at `path`.
    ///
    /// # Errors
    /// `BatchError::Io` when the file cannot be opened.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvItemSource<File>, BatchError> {
        let path = path.as_ref();
        debug!("Opening CSV input {}", path.display());
        let file = File::open(path)
            .map_err(|error| BatchError::Io(format!("{}: {}", path.display(), error)))?;
        let reader = self.reader_builder().from_reader(file);
        Ok(self.build(reader))
    }
}

/// Creates a [`CsvItemSource`] per partition, reading the file whose path the
/// partition context holds under the key name (`fileName` by default).
///
/// # Examples
///
/// ```no_run
/// use partitioned_batch::item::csv::csv_source::CsvItemSourceFactory;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Person {
///     name: String,
///     age: String,
/// }
///
/// let factory = CsvItemSourceFactory::<Person>::new().field_names(&["name", "age"]);
/// ```
pub struct CsvItemSourceFactory<T> {
    key_name: String,
    builder: CsvItemSourceBuilder,
    item: PhantomData<fn() -> T>,
}

impl<T> Default for CsvItemSourceFactory<T> {
    fn default() -> Self {
        Self {
            key_name: DEFAULT_KEY_NAME.to_string(),
            builder: CsvItemSourceBuilder::new(),
            item: PhantomData,
        }
    }
}

impl<T> CsvItemSourceFactory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the context key holding the file path.
    pub fn key_name(mut self, key_name: &str) -> Self {
        self.key_name = key_name.to_string();
        self
    }

    /// Takes the context key from `config.partition_key`.
    pub fn config(self, config: &StepConfig) -> Self {
        self.key_name(&config.partition_key)
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.builder = self.builder.delimiter(delimiter);
        self
    }

    pub fn has_headers(mut self, yes: bool) -> Self {
        self.builder = self.builder.has_headers(yes);
        self
    }

    pub fn field_names(mut self, names: &[&str]) -> Self {
        self.builder = self.builder.field_names(names);
        self
    }
}

impl<T: DeserializeOwned> ItemSourceFactory<T> for CsvItemSourceFactory<T> {
    fn create(&self, context: &ExecutionContext) -> Result<Box<dyn ItemSource<T>>, BatchError> {
        let path = context.get_string(&self.key_name).ok_or_else(|| {
            BatchError::Configuration(format!(
                "partition context has no {} entry",
                self.key_name
            ))
        })?;

        let source = self.builder.clone().from_path(path)?;
        Ok(Box::new(source))
    }
}
