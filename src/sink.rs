//! Result rows and the sinks that persist them.
//!
//! The evaluator streams [`ResultRow`]s through a bounded channel to a
//! single consumer that owns the sink, so rows reach storage while later
//! configurations are still running.

use crate::data::QueryId;
use crate::error::SinkError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One line of the results table.
///
/// | query | metric | meaning |
/// |-------|--------|---------|
/// | set | set | list metric value (missing if `error` is set) |
/// | unset | set | global metric value |
/// | set | unset | the query failed to score |
/// | unset | unset | the whole configuration failed |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub algorithm: String,
    pub split: String,
    pub query: Option<QueryId>,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    ListMetric,
    GlobalMetric,
    QueryFailure,
    ConfigFailure,
}

impl ResultRow {
    pub fn kind(&self) -> RowKind {
        match (&self.query, &self.metric) {
            (Some(_), Some(_)) => RowKind::ListMetric,
            (None, Some(_)) => RowKind::GlobalMetric,
            (Some(_), None) => RowKind::QueryFailure,
            (None, None) => RowKind::ConfigFailure,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}

pub trait ResultSink: Send + 'static {
    fn write(&mut self, row: &ResultRow) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl ResultSink for Box<dyn ResultSink> {
    fn write(&mut self, row: &ResultRow) -> Result<(), SinkError> {
        (**self).write(row)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Keeps rows in a buffer shared with its clones.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<ResultRow>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row written so far.
    pub fn rows(&self) -> Vec<ResultRow> {
        match self.rows.lock() {
            Ok(rows) => rows.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ResultSink for MemorySink {
    fn write(&mut self, row: &ResultRow) -> Result<(), SinkError> {
        match self.rows.lock() {
            Ok(mut rows) => rows.push(row.clone()),
            Err(poisoned) => poisoned.into_inner().push(row.clone()),
        }
        Ok(())
    }
}

/// CSV with a header row: algorithm, split, query, metric, value, error.
pub struct CsvSink<W: Write + Send + 'static> {
    writer: csv::Writer<W>,
}

impl<W: Write + Send + 'static> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
        }
    }
}

impl CsvSink<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
        })
    }
}

impl<W: Write + Send + 'static> ResultSink for CsvSink<W> {
    fn write(&mut self, row: &ResultRow) -> Result<(), SinkError> {
        self.writer.serialize(row)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write + Send + 'static> {
    out: BufWriter<W>,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.out.into_inner().map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl JsonLinesSink<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Send + 'static> ResultSink for JsonLinesSink<W> {
    fn write(&mut self, row: &ResultRow) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, row)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}
