use super::stage::{RunResult, Stage};
use crate::error::Result;
use crate::metrics::FlowMetrics;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Hand-off point feeding one stage's output into the next stage.
#[derive(Debug, Clone)]
pub struct Junction {
    name: String,
    upstream: Arc<Stage>,
    downstream: Arc<Stage>,
}

impl Junction {
    pub fn new(name: impl Into<String>, upstream: Arc<Stage>, downstream: Arc<Stage>) -> Self {
        Self {
            name: name.into(),
            upstream,
            downstream,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upstream(&self) -> &Arc<Stage> {
        &self.upstream
    }

    pub fn downstream(&self) -> &Arc<Stage> {
        &self.downstream
    }

    /// Copies the upstream output into the downstream input and runs downstream.
    ///
    /// The upstream stage must have completed. Without upstream output the
    /// downstream keeps whatever input it had, and fails with `MissingInput` if
    /// it had none.
    #[instrument(skip(self), fields(junction = %self.name))]
    pub async fn continue_flow(&self) -> Result<RunResult> {
        match self.upstream.output() {
            Some(output) => {
                debug!(
                    upstream = self.upstream.name(),
                    downstream = self.downstream.name(),
                    columns = output.len(),
                    "Handing off output"
                );
                self.downstream.set_input(output);
            }
            None => debug!(upstream = self.upstream.name(), "Upstream has no output"),
        }
        let result = self.downstream.run().await?;
        FlowMetrics::record_junction_continued();
        Ok(result)
    }
}
