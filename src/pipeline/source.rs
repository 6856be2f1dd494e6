use super::stage::Stage;
use crate::error::{FlowError, Result};
use crate::tabular::{CsvTableReader, TableReader};
use crate::table::Table;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

/// Entry point of a flow: the raw input table and the stage bound to each column.
#[derive(Debug)]
pub struct TableSource {
    description: String,
    path: PathBuf,
    columns: Vec<String>,
    rows: usize,
    bindings: BTreeMap<String, Arc<Stage>>,
}

impl TableSource {
    /// Reads `path` as CSV and hands every column to its bound stage.
    pub fn open(
        description: impl Into<String>,
        path: impl AsRef<Path>,
        bindings: BTreeMap<String, Arc<Stage>>,
    ) -> Result<Self> {
        Self::with_reader(description, path, bindings, &CsvTableReader::default())
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn with_reader(
        description: impl Into<String>,
        path: impl AsRef<Path>,
        bindings: BTreeMap<String, Arc<Stage>>,
        reader: &dyn TableReader,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = reader.read(&path)?;
        let source = Self::from_table(description, path, raw, bindings)?;
        info!(
            columns = source.columns.len(),
            rows = source.rows,
            "Source loaded"
        );
        Ok(source)
    }

    /// Binds an in-memory table. Every raw column needs exactly one bound stage.
    pub fn from_table(
        description: impl Into<String>,
        path: impl Into<PathBuf>,
        raw: Table,
        bindings: BTreeMap<String, Arc<Stage>>,
    ) -> Result<Self> {
        if raw.len() != bindings.len() {
            return Err(FlowError::UnboundColumns {
                raw: raw.len(),
                bound: bindings.len(),
                missing: raw.len().abs_diff(bindings.len()),
            });
        }
        if let Some(column) = raw.column_names().find(|c| !bindings.contains_key(*c)) {
            return Err(FlowError::UnboundColumn {
                column: column.to_string(),
            });
        }

        let columns: Vec<String> = raw.column_names().map(str::to_string).collect();
        let rows = raw.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        for (name, values) in raw {
            if let Some(stage) = bindings.get(&name) {
                stage.set_input(Table::single(name, values));
            }
        }

        Ok(Self {
            description: description.into(),
            path: path.into(),
            columns,
            rows,
            bindings,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names read from the input.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn bindings(&self) -> &BTreeMap<String, Arc<Stage>> {
        &self.bindings
    }

    /// Whether `stage` consumes one of this source's columns.
    pub fn feeds(&self, stage: &Arc<Stage>) -> bool {
        self.bindings.values().any(|s| Arc::ptr_eq(s, stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ops::element_op;
    use std::fs;
    use tempfile::tempdir;

    fn stage(name: &str) -> Arc<Stage> {
        Arc::new(Stage::elementwise(name, vec![element_op("add:1").unwrap()]))
    }

    #[test]
    fn test_source_assigns_single_column_inputs() {
        let a = stage("a_inc");
        let b = stage("b_inc");
        let raw: Table = [("a", vec![1.0, 2.0]), ("b", vec![3.0, 4.0])].into_iter().collect();
        let bindings = BTreeMap::from([
            ("a".to_string(), Arc::clone(&a)),
            ("b".to_string(), Arc::clone(&b)),
        ]);

        let source = TableSource::from_table("test", "mem", raw, bindings).unwrap();
        assert_eq!(source.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(source.rows(), 2);

        let a_in = a.input().unwrap();
        assert_eq!(a_in.len(), 1);
        assert_eq!(a_in.get("a"), Some(&[1.0, 2.0][..]));
        assert_eq!(b.input().unwrap().get("b"), Some(&[3.0, 4.0][..]));
        assert!(source.feeds(&a));
        assert!(!source.feeds(&stage("other")));
    }

    #[test]
    fn test_unbound_column_count_mismatch() {
        let raw: Table = [("a", vec![1.0]), ("b", vec![2.0])].into_iter().collect();
        let bindings = BTreeMap::from([("a".to_string(), stage("a_inc"))]);
        let err = TableSource::from_table("test", "mem", raw, bindings).unwrap_err();
        match err {
            FlowError::UnboundColumns { raw, bound, missing } => {
                assert_eq!((raw, bound, missing), (2, 1, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_binding_for_unknown_column() {
        let raw = Table::single("a", vec![1.0]);
        let bindings = BTreeMap::from([("z".to_string(), stage("z_inc"))]);
        let err = TableSource::from_table("test", "mem", raw, bindings).unwrap_err();
        assert!(matches!(err, FlowError::UnboundColumn { ref column } if column == "a"));
    }

    #[test]
    fn test_source_reads_in_csv_with_multiple_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");
        fs::write(&path, "a\n1\n2\n3\n").unwrap();
        let a = stage("a_inc");
        let bindings = BTreeMap::from([("a".to_string(), Arc::clone(&a))]);

        let source = TableSource::open("desc", &path, bindings).unwrap();
        assert_eq!(source.description(), "desc");
        assert_eq!(source.path(), path.as_path());
        assert_eq!(a.input().unwrap().get("a"), Some(&[1.0, 2.0, 3.0][..]));
    }

    #[test]
    fn test_returns_err_when_file_not_found() {
        let err = TableSource::open("", "bad", BTreeMap::new()).unwrap_err();
        assert!(matches!(err, FlowError::FileAccess { action: "open", .. }));
    }
}
