use super::stage::Stage;
use crate::constants::DEFAULT_OUTPUT_FILE;
use crate::error::{FlowError, Result};
use crate::metrics::FlowMetrics;
use crate::tabular::{CsvTableWriter, TableWriter};
use crate::table::Table;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Combines tables by appending, in order, every contributor's values for each
/// column name.
///
/// No input yields an empty table and a single input is returned as-is.
pub fn merge(tables: &[Arc<Table>]) -> Arc<Table> {
    match tables {
        [] => Arc::new(Table::new()),
        [only] => Arc::clone(only),
        many => {
            let mut merged = Table::new();
            for table in many {
                for (name, values) in table.iter() {
                    merged.extend_column(name, values);
                }
            }
            Arc::new(merged)
        }
    }
}

/// End of a flow: harvests stage outputs and writes the merged result.
pub struct TableSink {
    destination: PathBuf,
    stages: Vec<Arc<Stage>>,
    merged: Option<Arc<Table>>,
    writer: Box<dyn TableWriter>,
}

impl std::fmt::Debug for TableSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSink")
            .field("destination", &self.destination)
            .field("stages", &self.stages)
            .field("merged", &self.merged)
            .finish()
    }
}

impl TableSink {
    /// Creates a sink writing CSV to `destination`, or `results.csv` when none is given.
    pub fn new(destination: Option<PathBuf>, stages: Vec<Arc<Stage>>) -> Result<Self> {
        Self::with_writer(destination, stages, Box::new(CsvTableWriter::default()))
    }

    pub fn with_writer(
        destination: Option<PathBuf>,
        stages: Vec<Arc<Stage>>,
        writer: Box<dyn TableWriter>,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Err(FlowError::EmptySink);
        }
        let destination = destination
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE));
        Ok(Self {
            destination,
            stages,
            merged: None,
            writer,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn stages(&self) -> &[Arc<Stage>] {
        &self.stages
    }

    /// Merges the current output of every harvested stage.
    ///
    /// Stages without output contribute nothing.
    pub fn collect(&mut self) -> Arc<Table> {
        let outputs: Vec<Arc<Table>> = self
            .stages
            .iter()
            .filter_map(|stage| {
                let output = stage.output();
                if output.is_none() {
                    warn!(stage = stage.name(), "Stage has no output to collect");
                }
                output
            })
            .collect();
        let merged = merge(&outputs);
        self.merged = Some(Arc::clone(&merged));
        merged
    }

    /// Result of the last [`collect`](Self::collect).
    pub fn merged(&self) -> Option<&Arc<Table>> {
        self.merged.as_ref()
    }

    /// Writes the merged table, collecting first if that has not happened yet.
    #[instrument(skip(self), fields(destination = %self.destination.display()))]
    pub fn dump(&mut self) -> Result<usize> {
        let merged = match &self.merged {
            Some(merged) => Arc::clone(merged),
            None => self.collect(),
        };
        let rows = self.writer.write(&self.destination, &merged)?;
        FlowMetrics::record_rows_written(rows);
        info!(rows, "Sink written");
        Ok(rows)
    }
}
