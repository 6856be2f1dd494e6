use crate::error::{FlowError, Result};
use crate::pipeline::ops::{aggregate_op, element_op};
use crate::pipeline::{Junction, Orchestrator, Stage, TableSink, TableSource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// A flow file: the stages, their column bindings and the junctions between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowConfig {
    #[serde(default)]
    pub description: String,
    /// Destination file, `results.csv` when unset.
    pub output: Option<PathBuf>,
    /// Column worker pool size applied to stages without their own setting.
    pub workers: Option<usize>,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub junctions: Vec<JunctionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub name: String,
    /// Input column this stage is bound to. Omitted for stages fed by a junction.
    pub column: Option<String>,
    #[serde(default)]
    pub ops: Vec<String>,
    pub aggregate: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JunctionConfig {
    pub name: Option<String>,
    pub from: String,
    pub to: String,
}

impl JunctionConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.from, self.to))
    }
}

impl FromStr for FlowConfig {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl FlowConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        content.parse()
    }

    /// Checks the flow is well formed without touching any input data.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(FlowError::Config("flow must have at least one stage".to_string()));
        }
        if self.workers == Some(0) {
            return Err(FlowError::Config("workers must be at least 1".to_string()));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(FlowError::Config("stage names cannot be empty".to_string()));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(FlowError::Config(format!("duplicate stage name '{}'", stage.name)));
            }
            match (stage.ops.is_empty(), &stage.aggregate) {
                (false, Some(_)) => {
                    return Err(FlowError::ConflictingOperation {
                        stage: stage.name.clone(),
                    })
                }
                (true, None) => {
                    return Err(FlowError::MissingOperation {
                        stage: stage.name.clone(),
                    })
                }
                _ => {}
            }
            for op in &stage.ops {
                element_op(op)?;
            }
            if let Some(agg) = &stage.aggregate {
                aggregate_op(agg)?;
            }
            if let Some(column) = &stage.column {
                if !columns.insert(column.as_str()) {
                    return Err(FlowError::Config(format!(
                        "column '{}' is bound to more than one stage",
                        column
                    )));
                }
            }
        }

        let mut fed = HashSet::new();
        for junction in &self.junctions {
            let name = junction.display_name();
            for end in [&junction.from, &junction.to] {
                if !names.contains(end.as_str()) {
                    return Err(FlowError::Config(format!(
                        "junction '{}' references unknown stage '{}'",
                        name, end
                    )));
                }
            }
            if junction.from == junction.to {
                return Err(FlowError::Config(format!("junction '{}' feeds a stage into itself", name)));
            }
            if !fed.insert(junction.to.as_str()) {
                return Err(FlowError::Config(format!(
                    "stage '{}' is fed by more than one junction",
                    junction.to
                )));
            }
        }

        for stage in &self.stages {
            match (&stage.column, fed.contains(stage.name.as_str())) {
                (Some(column), true) => {
                    return Err(FlowError::Config(format!(
                        "stage '{}' is bound to column '{}' and also fed by a junction",
                        stage.name, column
                    )))
                }
                (None, false) => {
                    return Err(FlowError::Config(format!(
                        "stage '{}' has no input: bind it to a column or feed it through a junction",
                        stage.name
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn build_stage(&self, stage: &StageConfig) -> Result<Stage> {
        let mut builder = Stage::builder(&stage.name);
        if let Some(workers) = stage.workers.or(self.workers) {
            builder = builder.workers(workers);
        }
        for op in &stage.ops {
            builder = builder.then(element_op(op)?);
        }
        if let Some(agg) = &stage.aggregate {
            builder = builder.aggregate(aggregate_op(agg)?);
        }
        builder.build()
    }

    /// Builds a ready-to-run orchestrator reading `input`.
    ///
    /// `output` overrides the destination from the flow file. The sink harvests
    /// every stage that does not feed a junction.
    pub fn build(&self, input: impl AsRef<Path>, output: Option<PathBuf>) -> Result<Orchestrator> {
        self.validate()?;

        let mut stages: HashMap<&str, Arc<Stage>> = HashMap::new();
        let mut ordered = Vec::with_capacity(self.stages.len());
        let mut bindings = BTreeMap::new();
        for config in &self.stages {
            let stage = Arc::new(self.build_stage(config)?);
            if let Some(column) = &config.column {
                bindings.insert(column.clone(), Arc::clone(&stage));
            }
            stages.insert(config.name.as_str(), Arc::clone(&stage));
            ordered.push(stage);
        }

        let mut flow = Orchestrator::new(self.description.clone());
        let mut feeds_junction = HashSet::new();
        for junction in &self.junctions {
            let (Some(from), Some(to)) = (stages.get(junction.from.as_str()), stages.get(junction.to.as_str()))
            else {
                return Err(FlowError::Config(format!(
                    "junction '{}' references an unknown stage",
                    junction.display_name()
                )));
            };
            feeds_junction.insert(junction.from.as_str());
            flow.register_junction(Junction::new(junction.display_name(), Arc::clone(from), Arc::clone(to)));
        }

        let harvested: Vec<Arc<Stage>> = ordered
            .iter()
            .filter(|stage| !feeds_junction.contains(stage.name()))
            .cloned()
            .collect();
        for stage in ordered {
            flow.register_stage(stage);
        }

        let source = TableSource::open(self.description.clone(), input, bindings)?;
        let sink = TableSink::new(output.or_else(|| self.output.clone()), harvested)?;
        info!(
            stages = flow.stages().len(),
            junctions = flow.junctions().len(),
            destination = %sink.destination().display(),
            "Flow built"
        );
        flow.register_source(source)?;
        flow.register_sink(sink)?;
        Ok(flow)
    }
}
