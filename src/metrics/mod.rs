//! Metrics for the flow engine
//!
//! Each component records through the `metrics` facade under a common
//! `pipe_flow_{component}_` prefix. Nothing is exported unless [`init_metrics`]
//! installs the in-process Prometheus recorder; without a recorder every call is a
//! no-op.

pub mod flow;
pub mod stage;

pub use flow::FlowMetrics;
pub use stage::StageMetrics;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Installs the Prometheus recorder and registers every component's metrics.
///
/// Idempotent. Returns `false` when another recorder was already installed.
pub fn init_metrics() -> bool {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_all_metrics();
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        })
        .is_some()
}

/// Renders the current metric values in Prometheus text format.
pub fn render() -> Option<String> {
    HANDLE.get().and_then(|h| h.as_ref()).map(PrometheusHandle::render)
}

/// Implemented by each component that records metrics.
pub trait ComponentMetrics {
    /// Pre-registers the component's metrics so they appear before first use.
    fn register_metrics();

    fn component_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

/// Builds a metric name following pipe_flow_{component}_{name}[_total].
macro_rules! component_metric {
    (counter, $component:literal, $name:literal) => {
        concat!("pipe_flow_", $component, "_", $name, "_total")
    };
    (histogram, $component:literal, $name:literal) => {
        concat!("pipe_flow_", $component, "_", $name)
    };
}

pub(crate) use component_metric;

/// Registers every component and reports name collisions.
pub fn register_all_metrics() -> usize {
    let mut all: HashMap<&'static str, MetricDoc> = HashMap::new();
    register_component::<StageMetrics>(&mut all);
    register_component::<FlowMetrics>(&mut all);
    debug!("Registered {} metrics", all.len());
    all.len()
}

fn register_component<T: ComponentMetrics>(all: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    for doc in T::metrics_documentation() {
        if all.contains_key(doc.name) {
            warn!(
                "Metric name conflict: '{}' is defined twice (component '{}')",
                doc.name,
                T::component_name()
            );
        } else {
            all.insert(doc.name, doc);
        }
    }
}
