//! Delimited file reading and writing for [`Table`]s
//!
//! Input files carry a header row of column names followed by one numeric cell
//! per column per row. Output files are transposed: one row per column, the
//! column name first and then its values with fixed decimal precision.

use crate::constants::OUTPUT_PRECISION;
use crate::error::{FlowError, Result};
use crate::table::Table;
use std::fs::File;
use std::path::Path;
use tracing::debug;

pub trait TableReader: Send + Sync {
    /// Reads the whole file at `path` into a table.
    fn read(&self, path: &Path) -> Result<Table>;
}

pub trait TableWriter: Send + Sync {
    /// Writes `table` to `path`, returning the number of rows written.
    fn write(&self, path: &Path, table: &Table) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct CsvTableReader {
    delimiter: u8,
}

impl Default for CsvTableReader {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvTableReader {
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl TableReader for CsvTableReader {
    fn read(&self, path: &Path) -> Result<Table> {
        let path_str = path.display().to_string();
        let file = File::open(path).map_err(|source| FlowError::FileAccess {
            action: "open",
            path: path_str.clone(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() {
            return Err(FlowError::EmptyInput { path: path_str });
        }

        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            for (cell, (name, column)) in record.iter().zip(headers.iter().zip(columns.iter_mut())) {
                let value = cell.trim().parse::<f64>().map_err(|_| FlowError::Parse {
                    row,
                    column: name.clone(),
                    value: cell.to_string(),
                })?;
                column.push(value);
            }
        }

        let mut table = Table::new();
        for (name, values) in headers.into_iter().zip(columns) {
            if table.contains(&name) {
                return Err(FlowError::DuplicateColumn {
                    column: name,
                    path: path_str,
                });
            }
            table.insert(name, values);
        }
        debug!(path = %path.display(), columns = table.len(), "Read table");
        Ok(table)
    }
}

#[derive(Debug, Clone)]
pub struct CsvTableWriter {
    delimiter: u8,
    precision: usize,
}

impl Default for CsvTableWriter {
    fn default() -> Self {
        Self {
            delimiter: b',',
            precision: OUTPUT_PRECISION,
        }
    }
}

impl CsvTableWriter {
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }
}

impl TableWriter for CsvTableWriter {
    fn write(&self, path: &Path, table: &Table) -> Result<usize> {
        let path_str = path.display().to_string();
        let file = File::create(path).map_err(|source| FlowError::FileAccess {
            action: "create",
            path: path_str.clone(),
            source,
        })?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_writer(file);

        for (name, values) in table {
            let mut record = Vec::with_capacity(values.len() + 1);
            record.push(name.clone());
            record.extend(values.iter().map(|v| format!("{:.*}", self.precision, v)));
            writer
                .write_record(&record)
                .map_err(|e| FlowError::FileAccess {
                    action: "write",
                    path: path_str.clone(),
                    source: e.into(),
                })?;
        }
        writer.flush().map_err(|source| FlowError::FileAccess {
            action: "write",
            path: path_str.clone(),
            source,
        })?;
        debug!(path = %path.display(), rows = table.len(), "Wrote table");
        Ok(table.len())
    }
}
