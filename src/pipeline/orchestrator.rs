use super::junction::Junction;
use super::queue::ReadinessQueue;
use super::sink::TableSink;
use super::source::TableSource;
use super::stage::{RunResult, Stage};
use crate::error::{FlowError, Result};
use crate::metrics::FlowMetrics;
use crate::table::Table;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Anything the orchestrator accepts through [`Orchestrator::register`].
#[derive(Debug)]
pub enum Registrant {
    Stage(Arc<Stage>),
    Junction(Junction),
    Source(TableSource),
    Sink(TableSink),
}

impl From<Arc<Stage>> for Registrant {
    fn from(stage: Arc<Stage>) -> Self {
        Registrant::Stage(stage)
    }
}

impl From<Junction> for Registrant {
    fn from(junction: Junction) -> Self {
        Registrant::Junction(junction)
    }
}

impl From<TableSource> for Registrant {
    fn from(source: TableSource) -> Self {
        Registrant::Source(source)
    }
}

impl From<TableSink> for Registrant {
    fn from(sink: TableSink) -> Self {
        Registrant::Sink(sink)
    }
}

/// Units placed on the readiness queue.
#[derive(Debug, Clone, Copy)]
enum Ready {
    /// Run every root stage, i.e. the stages fed by the source rather than by a junction.
    Source,
    /// Advance through the junction at this index.
    Junction(usize),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: f64,
}

impl StageTiming {
    fn new(stage: &Stage, result: &RunResult) -> Self {
        Self {
            stage: stage.name().to_string(),
            elapsed_ms: result.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageTiming>,
    pub junctions_continued: usize,
    pub rows_written: usize,
    pub destination: PathBuf,
    #[serde(skip)]
    pub output: Arc<Table>,
}

/// Elapsed time of a run alongside its terminal result.
#[derive(Debug)]
pub struct RunOutcome {
    pub elapsed: Duration,
    pub result: Result<RunSummary>,
}

impl RunOutcome {
    pub fn elapsed_display(&self) -> String {
        format!("{:.3?}", self.elapsed)
    }

    pub fn into_result(self) -> Result<RunSummary> {
        self.result
    }
}

/// Registers the pieces of a flow and drives one end-to-end run.
#[derive(Debug, Default)]
pub struct Orchestrator {
    description: String,
    source: Option<TableSource>,
    sink: Option<TableSink>,
    stages: Vec<Arc<Stage>>,
    junctions: Vec<Junction>,
}

impl Orchestrator {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stores `item` in the slot matching its kind.
    pub fn register(&mut self, item: impl Into<Registrant>) -> Result<()> {
        match item.into() {
            Registrant::Stage(stage) => self.register_stage(stage),
            Registrant::Junction(junction) => self.register_junction(junction),
            Registrant::Source(source) => return self.register_source(source),
            Registrant::Sink(sink) => return self.register_sink(sink),
        }
        Ok(())
    }

    pub fn register_stage(&mut self, stage: Arc<Stage>) {
        debug!(stage = stage.name(), "Registered stage");
        self.stages.push(stage);
    }

    pub fn register_junction(&mut self, junction: Junction) {
        debug!(junction = junction.name(), "Registered junction");
        self.junctions.push(junction);
    }

    /// Sets the source. Fails if one is already registered; see [`Self::replace_source`].
    pub fn register_source(&mut self, source: TableSource) -> Result<()> {
        if self.source.is_some() {
            return Err(FlowError::DuplicateRegistration { kind: "source" });
        }
        self.source = Some(source);
        Ok(())
    }

    /// Sets the sink. Fails if one is already registered; see [`Self::replace_sink`].
    pub fn register_sink(&mut self, sink: TableSink) -> Result<()> {
        if self.sink.is_some() {
            return Err(FlowError::DuplicateRegistration { kind: "sink" });
        }
        self.sink = Some(sink);
        Ok(())
    }

    /// Sets the source, returning the one it replaces.
    pub fn replace_source(&mut self, source: TableSource) -> Option<TableSource> {
        self.source.replace(source)
    }

    /// Sets the sink, returning the one it replaces.
    pub fn replace_sink(&mut self, sink: TableSink) -> Option<TableSink> {
        self.sink.replace(sink)
    }

    pub fn stages(&self) -> &[Arc<Stage>] {
        &self.stages
    }

    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    /// Registered stages that no junction feeds.
    fn root_stages(&self) -> Vec<Arc<Stage>> {
        self.stages
            .iter()
            .filter(|stage| !self.junctions.iter().any(|j| Arc::ptr_eq(j.downstream(), stage)))
            .cloned()
            .collect()
    }

    /// Runs the flow once: every stage, every junction, then the sink.
    ///
    /// The first failure aborts the run before anything is written.
    pub async fn run(mut self) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("flow", run_id = %run_id, description = %self.description);
        let started = Instant::now();
        let result = self.execute(run_id).instrument(span.clone()).await;
        let elapsed = started.elapsed();

        let _enter = span.enter();
        FlowMetrics::record_run(elapsed, result.is_ok());
        match &result {
            Ok(summary) => info!(
                stages = summary.stages.len(),
                junctions = summary.junctions_continued,
                rows = summary.rows_written,
                elapsed = ?elapsed,
                "Flow completed"
            ),
            Err(e) => error!(elapsed = ?elapsed, "Flow failed: {}", e),
        }
        RunOutcome { elapsed, result }
    }

    async fn execute(&mut self, run_id: Uuid) -> Result<RunSummary> {
        let started_at = Utc::now();
        let source = self.source.as_ref().ok_or(FlowError::NoSource)?;
        if self.sink.is_none() {
            return Err(FlowError::NoSink);
        }
        info!(
            source = source.description(),
            stages = self.stages.len(),
            junctions = self.junctions.len(),
            "Starting flow"
        );

        let mut queue = ReadinessQueue::new(self.junctions.len() + 1);
        queue.push(Ready::Source)?;
        let mut enqueued = vec![false; self.junctions.len()];
        let mut timings = Vec::new();
        let mut junctions_continued = 0;

        while let Some(item) = queue.pop() {
            let finished = match item {
                Ready::Source => {
                    let results = run_stages(self.root_stages()).await?;
                    let mut finished = Vec::with_capacity(results.len());
                    for (stage, result) in results {
                        timings.push(StageTiming::new(&stage, &result));
                        finished.push(stage);
                    }
                    finished
                }
                Ready::Junction(idx) => {
                    let junction = &self.junctions[idx];
                    let result = junction.continue_flow().await?;
                    junctions_continued += 1;
                    timings.push(StageTiming::new(junction.downstream(), &result));
                    vec![Arc::clone(junction.downstream())]
                }
            };

            for stage in &finished {
                for (idx, junction) in self.junctions.iter().enumerate() {
                    if !enqueued[idx] && Arc::ptr_eq(junction.upstream(), stage) {
                        enqueued[idx] = true;
                        queue.push(Ready::Junction(idx))?;
                    }
                }
            }
        }

        if let Some(idx) = enqueued.iter().position(|queued| !queued) {
            let junction = &self.junctions[idx];
            return Err(FlowError::StalledJunction {
                junction: junction.name().to_string(),
                upstream: junction.upstream().name().to_string(),
            });
        }

        let sink = self.sink.as_mut().ok_or(FlowError::NoSink)?;
        let output = sink.collect();
        let rows_written = sink.dump()?;

        Ok(RunSummary {
            run_id,
            description: self.description.clone(),
            started_at,
            stages: timings,
            junctions_continued,
            rows_written,
            destination: sink.destination().to_path_buf(),
            output,
        })
    }
}

/// Runs independent stages concurrently, failing on the first error.
///
/// Results come back in the order the stages were given. A failure raises a
/// shared flag that stops the column work of every sibling stage.
async fn run_stages(stages: Vec<Arc<Stage>>) -> Result<Vec<(Arc<Stage>, RunResult)>> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();
    for (idx, stage) in stages.into_iter().enumerate() {
        let cancelled = Arc::clone(&cancelled);
        tasks.spawn(async move {
            let result = stage.run_until_cancelled(cancelled).await;
            (idx, stage, result)
        });
    }

    let mut done = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let (idx, stage, result) = match joined {
            Ok(finished) => finished,
            Err(e) => {
                cancelled.store(true, Ordering::Relaxed);
                tasks.abort_all();
                return Err(e.into());
            }
        };
        match result {
            Ok(result) => done.push((idx, stage, result)),
            Err(e) => {
                cancelled.store(true, Ordering::Relaxed);
                tasks.abort_all();
                return Err(e);
            }
        }
    }
    done.sort_by_key(|(idx, _, _)| *idx);
    Ok(done.into_iter().map(|(_, stage, result)| (stage, result)).collect())
}
