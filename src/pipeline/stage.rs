use super::ops::{AggregateFn, ElementFn};
use crate::constants::DEFAULT_COLUMN_WORKERS;
use crate::error::{FlowError, Result};
use crate::metrics::StageMetrics;
use crate::table::Table;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// What a stage does to each of its columns.
#[derive(Clone)]
pub enum Operation {
    /// Chain of scalar functions composed in order over every value.
    Elementwise(Vec<ElementFn>),
    /// Reduction of every column to a single value.
    Aggregate(AggregateFn),
}

impl Operation {
    pub fn mode(&self) -> &'static str {
        match self {
            Operation::Elementwise(_) => "elementwise",
            Operation::Aggregate(_) => "aggregate",
        }
    }
}

/// Output of a successful stage run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub output: Arc<Table>,
    pub elapsed: Duration,
}

/// Builds a [`Stage`], rejecting stages configured with both an elementwise chain
/// and an aggregate.
pub struct StageBuilder {
    name: String,
    ops: Vec<ElementFn>,
    aggregate: Option<AggregateFn>,
    workers: usize,
}

impl StageBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
            aggregate: None,
            workers: DEFAULT_COLUMN_WORKERS,
        }
    }

    /// Appends an elementwise operation to the chain.
    pub fn then(mut self, op: ElementFn) -> Self {
        self.ops.push(op);
        self
    }

    pub fn then_fn(self, f: impl Fn(f64) -> anyhow::Result<f64> + Send + Sync + 'static) -> Self {
        self.then(Arc::new(f))
    }

    pub fn aggregate(mut self, op: AggregateFn) -> Self {
        self.aggregate = Some(op);
        self
    }

    pub fn aggregate_fn(
        self,
        f: impl Fn(&[f64]) -> anyhow::Result<f64> + Send + Sync + 'static,
    ) -> Self {
        self.aggregate(Arc::new(f))
    }

    /// Upper bound on columns processed concurrently during one run.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn build(self) -> Result<Stage> {
        let operation = match (self.ops.is_empty(), self.aggregate) {
            (false, Some(_)) => {
                return Err(FlowError::ConflictingOperation { stage: self.name });
            }
            (true, Some(agg)) => Operation::Aggregate(agg),
            (_, None) => Operation::Elementwise(self.ops),
        };
        Ok(Stage {
            name: self.name,
            operation,
            workers: self.workers,
            input: RwLock::new(None),
            output: RwLock::new(None),
        })
    }
}

/// Transform unit bound to one or more columns.
///
/// Input and output tables are shared behind `Arc` so that sources, junctions and
/// sinks can hand them around without copying column data.
pub struct Stage {
    name: String,
    operation: Operation,
    workers: usize,
    input: RwLock<Option<Arc<Table>>>,
    output: RwLock<Option<Arc<Table>>>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("mode", &self.operation.mode())
            .field("workers", &self.workers)
            .finish()
    }
}

impl Stage {
    pub fn builder(name: impl Into<String>) -> StageBuilder {
        StageBuilder::new(name)
    }

    /// Stage composing `ops` in order over every value.
    pub fn elementwise(name: impl Into<String>, ops: Vec<ElementFn>) -> Self {
        Self::from_operation(name, Operation::Elementwise(ops))
    }

    /// Stage reducing every column with `op`.
    pub fn aggregate(name: impl Into<String>, op: AggregateFn) -> Self {
        Self::from_operation(name, Operation::Aggregate(op))
    }

    fn from_operation(name: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: name.into(),
            operation,
            workers: DEFAULT_COLUMN_WORKERS,
            input: RwLock::new(None),
            output: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Replaces the input table. Last writer wins.
    pub fn set_input(&self, table: impl Into<Arc<Table>>) {
        *self.input.write().unwrap_or_else(PoisonError::into_inner) = Some(table.into());
    }

    pub fn input(&self) -> Option<Arc<Table>> {
        self.input.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Output of the last successful run, if any.
    pub fn output(&self) -> Option<Arc<Table>> {
        self.output.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn store_output(&self, table: Option<Arc<Table>>) {
        *self.output.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    #[cfg(test)]
    pub(crate) fn set_output(&self, table: Table) {
        self.store_output(Some(Arc::new(table)));
    }

    /// Runs the stage's operation over every column of its input.
    ///
    /// A failure in any column aborts the whole run and leaves the stage without
    /// output.
    pub async fn run(&self) -> Result<RunResult> {
        self.run_until_cancelled(Arc::new(AtomicBool::new(false))).await
    }

    /// Same as [`run`](Self::run), but column work also stops once `cancelled` is
    /// set from outside, e.g. when a sibling stage of the same flow has failed.
    #[instrument(skip(self, cancelled), fields(stage = %self.name, mode = self.operation.mode()))]
    pub async fn run_until_cancelled(&self, cancelled: Arc<AtomicBool>) -> Result<RunResult> {
        let started = Instant::now();
        self.store_output(None);

        let input = self.input().ok_or_else(|| FlowError::MissingInput {
            stage: self.name.clone(),
        })?;
        if let Operation::Elementwise(ops) = &self.operation {
            if ops.is_empty() {
                return Err(FlowError::MissingOperation {
                    stage: self.name.clone(),
                });
            }
        }

        match self.run_columns(input, cancelled).await {
            Ok(table) => {
                let elapsed = started.elapsed();
                let output = Arc::new(table);
                self.store_output(Some(Arc::clone(&output)));
                StageMetrics::record_run_success(&self.name, output.value_count(), elapsed);
                info!(
                    columns = output.len(),
                    values = output.value_count(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Stage completed"
                );
                Ok(RunResult { output, elapsed })
            }
            Err(e) => {
                StageMetrics::record_run_failure(&self.name);
                warn!("Stage failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_columns(&self, input: Arc<Table>, cancelled: Arc<AtomicBool>) -> Result<Table> {
        let permits = Arc::new(Semaphore::new(self.workers));
        let halt = Halt {
            failed: Arc::new(AtomicBool::new(false)),
            cancelled,
        };
        let mut tasks = JoinSet::new();

        for column in input.column_names() {
            if halt.is_set() {
                break;
            }
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await?;
            let column = column.to_string();
            let input = Arc::clone(&input);
            let operation = self.operation.clone();
            let stage = self.name.clone();
            let halt = halt.clone();

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let values = input.get(&column).unwrap_or_default();
                let result = match &operation {
                    Operation::Elementwise(ops) => {
                        apply_chain(&stage, &column, values, ops, &halt)
                    }
                    Operation::Aggregate(op) => apply_aggregate(&stage, &column, values, op),
                };
                if result.is_err() {
                    halt.failed.store(true, Ordering::Relaxed);
                }
                result.map(|values| values.map(|v| (column, v)))
            });
        }

        let mut output = Table::new();
        let mut first_error: Option<FlowError> = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(Some((column, values)))) => {
                    debug!(column = %column, rows = values.len(), "Column finished");
                    output.insert(column, values);
                    continue;
                }
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => FlowError::from(e),
            };
            if first_error.is_none() {
                halt.failed.store(true, Ordering::Relaxed);
                tasks.abort_all();
                first_error = Some(failure);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if halt.cancelled.load(Ordering::Relaxed) => Err(FlowError::Cancelled {
                stage: self.name.clone(),
            }),
            None => Ok(output),
        }
    }
}

/// Stop signals checked between rows: `failed` is raised by this stage's own
/// columns, `cancelled` by whoever started the run.
#[derive(Clone)]
struct Halt {
    failed: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl Halt {
    fn is_set(&self) -> bool {
        self.failed.load(Ordering::Relaxed) || self.cancelled.load(Ordering::Relaxed)
    }
}

/// Feeds every value of a column through the chain. Returns `None` when a sibling
/// column failed or the run was cancelled.
///
/// A failing op is reported with the value it was given, not the raw input.
fn apply_chain(
    stage: &str,
    column: &str,
    values: &[f64],
    ops: &[ElementFn],
    halt: &Halt,
) -> Result<Option<Vec<f64>>> {
    let mut out = Vec::with_capacity(values.len());
    for (row, &value) in values.iter().enumerate() {
        if halt.is_set() {
            return Ok(None);
        }
        let mut acc = value;
        for op in ops {
            let seen = acc;
            acc = op(seen).map_err(|e| FlowError::ElementOperation {
                stage: stage.to_string(),
                column: column.to_string(),
                row,
                value: seen,
                message: format!("{:#}", e),
            })?;
        }
        out.push(acc);
    }
    Ok(Some(out))
}

fn apply_aggregate(
    stage: &str,
    column: &str,
    values: &[f64],
    op: &AggregateFn,
) -> Result<Option<Vec<f64>>> {
    let reduced = op(values).map_err(|e| FlowError::AggregateOperation {
        stage: stage.to_string(),
        column: column.to_string(),
        message: format!("{:#}", e),
    })?;
    Ok(Some(vec![reduced]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ops::{aggregate_op, element_op};
    use anyhow::bail;

    fn plus_one() -> ElementFn {
        element_op("add:1").unwrap()
    }

    #[tokio::test]
    async fn test_cannot_run_without_input() {
        let stage = Stage::elementwise("no_input", vec![plus_one()]);
        let err = stage.run().await.unwrap_err();
        assert!(matches!(err, FlowError::MissingInput { .. }));
        assert_eq!(err.to_string(), "cannot run stage 'no_input' without input");
    }

    #[tokio::test]
    async fn test_cannot_run_without_operation() {
        let stage = Stage::elementwise("no_ops", vec![]);
        stage.set_input(Table::single("a", vec![1.0]));
        let err = stage.run().await.unwrap_err();
        assert!(matches!(err, FlowError::MissingOperation { .. }));
    }

    #[test]
    fn test_builder_rejects_chain_and_aggregate() {
        let err = Stage::builder("both")
            .then_fn(|v| Ok(v))
            .aggregate_fn(|v| Ok(v.iter().sum()))
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::ConflictingOperation { .. }));
    }

    #[test]
    fn test_builder_without_operations_builds_empty_chain() {
        let stage = Stage::builder("empty").build().unwrap();
        assert_eq!(stage.operation().mode(), "elementwise");
    }

    #[tokio::test]
    async fn test_flows_single_val_through_op() {
        let stage = Stage::elementwise("inc", vec![plus_one()]);
        stage.set_input(Table::single("a", vec![1.0]));
        let result = stage.run().await.unwrap();
        assert_eq!(result.output.get("a"), Some(&[2.0][..]));
    }

    #[tokio::test]
    async fn test_flows_multi_vals_through_op() {
        let stage = Stage::builder("inc").then(plus_one()).workers(2).build().unwrap();
        stage.set_input(
            [("a", vec![1.0, 2.0, 3.0]), ("b", vec![4.0, 5.0, 6.0]), ("c", vec![7.0])]
                .into_iter()
                .collect::<Table>(),
        );
        let result = stage.run().await.unwrap();
        assert_eq!(result.output.get("a"), Some(&[2.0, 3.0, 4.0][..]));
        assert_eq!(result.output.get("b"), Some(&[5.0, 6.0, 7.0][..]));
        assert_eq!(result.output.get("c"), Some(&[8.0][..]));
        assert_eq!(stage.output().as_deref(), Some(result.output.as_ref()));
    }

    #[tokio::test]
    async fn test_chain_is_composed_in_order() {
        let stage = Stage::builder("compose")
            .then_fn(|v| Ok(v + 1.0))
            .then_fn(|v| Ok(v * 10.0))
            .build()
            .unwrap();
        stage.set_input(Table::single("a", vec![1.0, 2.0]));
        let result = stage.run().await.unwrap();
        assert_eq!(result.output.get("a"), Some(&[20.0, 30.0][..]));
    }

    #[tokio::test]
    async fn test_preserves_row_order_on_long_columns() {
        let values: Vec<f64> = (0..10_000u32).map(f64::from).collect();
        let stage = Stage::elementwise("inc", vec![plus_one()]);
        stage.set_input(Table::single("a", values.clone()));
        let result = stage.run().await.unwrap();
        let expected: Vec<f64> = values.iter().map(|v| v + 1.0).collect();
        assert_eq!(result.output.get("a"), Some(expected.as_slice()));
    }

    #[tokio::test]
    async fn test_throws_err_on_op_err() {
        let stage = Stage::builder("fails")
            .then_fn(|v| {
                if v > 2.0 {
                    bail!("failed");
                }
                Ok(v)
            })
            .build()
            .unwrap();
        stage.set_input(Table::single("a", vec![1.0, 2.0, 3.0, 4.0]));
        let err = stage.run().await.unwrap_err();
        match &err {
            FlowError::ElementOperation { column, row, value, message, .. } => {
                assert_eq!(column, "a");
                assert_eq!(*row, 2);
                assert_eq!(*value, 3.0);
                assert_eq!(message, "failed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.to_string(),
            "stage 'fails' failed to apply op to val 3 on row 2 of col (a) with op msg: failed"
        );
        assert!(stage.output().is_none());
    }

    #[tokio::test]
    async fn test_op_error_reports_value_seen_by_failing_op() {
        let stage = Stage::elementwise(
            "inc_recip",
            vec![plus_one(), element_op("recip").unwrap()],
        );
        stage.set_input(Table::single("a", vec![1.0, -1.0]));
        let err = stage.run().await.unwrap_err();
        assert!(matches!(err, FlowError::ElementOperation { row: 1, value, .. } if value == 0.0));
        assert!(err.to_string().contains("failed to apply op to val 0 on row 1"));
    }

    #[tokio::test]
    async fn test_external_cancel_stops_run_without_output() {
        let stage = Stage::elementwise("inc", vec![plus_one()]);
        stage.set_input(Table::single("a", vec![1.0, 2.0]));
        let err = stage
            .run_until_cancelled(Arc::new(AtomicBool::new(true)))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Cancelled { ref stage } if stage == "inc"));
        assert!(stage.output().is_none());
    }

    #[tokio::test]
    async fn test_failed_rerun_discards_previous_output() {
        let stage = Stage::builder("flaky")
            .then_fn(|v| if v < 0.0 { bail!("negative") } else { Ok(v) })
            .build()
            .unwrap();
        stage.set_input(Table::single("a", vec![1.0]));
        stage.run().await.unwrap();
        assert!(stage.output().is_some());

        stage.set_input(Table::single("a", vec![-1.0]));
        assert!(stage.run().await.is_err());
        assert!(stage.output().is_none());
    }

    #[tokio::test]
    async fn test_one_failing_column_fails_whole_stage() {
        let stage = Stage::builder("mixed")
            .then_fn(|v| if v.is_nan() { bail!("nan") } else { Ok(v) })
            .workers(1)
            .build()
            .unwrap();
        stage.set_input(
            [("a", vec![1.0]), ("b", vec![f64::NAN]), ("c", vec![3.0])]
                .into_iter()
                .collect::<Table>(),
        );
        let err = stage.run().await.unwrap_err();
        assert!(matches!(err, FlowError::ElementOperation { ref column, .. } if column == "b"));
        assert!(stage.output().is_none());
    }

    #[tokio::test]
    async fn test_return_aggregate_data() {
        let stage = Stage::aggregate("sum", aggregate_op("sum").unwrap());
        stage.set_input(Table::single("a", vec![1.0, 1.0, 1.0]));
        let result = stage.run().await.unwrap();
        assert_eq!(result.output.get("a"), Some(&[3.0][..]));
    }

    #[tokio::test]
    async fn test_aggregate_product_reduces_to_single_row() {
        let stage = Stage::aggregate("product", aggregate_op("product").unwrap());
        stage.set_input(
            [("c", vec![2.0, 3.0, 4.0]), ("d", vec![1.0, 5.0])]
                .into_iter()
                .collect::<Table>(),
        );
        let result = stage.run().await.unwrap();
        assert_eq!(result.output.get("c"), Some(&[24.0][..]));
        assert_eq!(result.output.get("d"), Some(&[5.0][..]));
    }

    #[tokio::test]
    async fn test_returns_err_on_aggregate_func_error() {
        let stage = Stage::builder("agg")
            .aggregate_fn(|_| bail!("test error"))
            .build()
            .unwrap();
        stage.set_input(Table::single("a", vec![1.0, 1.0, 1.0]));
        let err = stage.run().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage 'agg' failed to perform aggregate op on col (a), err: test error"
        );
        assert!(stage.output().is_none());
    }

    #[tokio::test]
    async fn test_empty_input_table_yields_empty_output() {
        let stage = Stage::elementwise("inc", vec![plus_one()]);
        stage.set_input(Table::new());
        let result = stage.run().await.unwrap();
        assert!(result.output.is_empty());
    }
}
