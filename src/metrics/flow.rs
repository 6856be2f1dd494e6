//! Orchestrator-level metrics

use super::{component_metric, ComponentMetrics, MetricDoc, MetricType};
use std::time::Duration;

pub struct FlowMetrics;

impl FlowMetrics {
    pub fn record_run(elapsed: Duration, success: bool) {
        if success {
            ::metrics::counter!(component_metric!(counter, "flow", "runs_success")).increment(1);
        } else {
            ::metrics::counter!(component_metric!(counter, "flow", "runs_error")).increment(1);
        }
        ::metrics::histogram!(component_metric!(histogram, "flow", "run_duration_seconds"))
            .record(elapsed.as_secs_f64());
    }

    pub fn record_junction_continued() {
        ::metrics::counter!(component_metric!(counter, "flow", "junctions_continued")).increment(1);
    }

    pub fn record_rows_written(rows: usize) {
        ::metrics::counter!(component_metric!(counter, "flow", "rows_written")).increment(rows as u64);
    }
}

impl ComponentMetrics for FlowMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(component_metric!(counter, "flow", "runs_success"));
        let _ = ::metrics::counter!(component_metric!(counter, "flow", "runs_error"));
        let _ = ::metrics::counter!(component_metric!(counter, "flow", "junctions_continued"));
        let _ = ::metrics::counter!(component_metric!(counter, "flow", "rows_written"));
        let _ = ::metrics::histogram!(component_metric!(histogram, "flow", "run_duration_seconds"));
    }

    fn component_name() -> &'static str {
        "flow"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: component_metric!(counter, "flow", "runs_success"),
                metric_type: MetricType::Counter,
                help: "Flow runs whose sink was written",
                labels: vec![],
            },
            MetricDoc {
                name: component_metric!(counter, "flow", "runs_error"),
                metric_type: MetricType::Counter,
                help: "Flow runs aborted by an error",
                labels: vec![],
            },
            MetricDoc {
                name: component_metric!(counter, "flow", "junctions_continued"),
                metric_type: MetricType::Counter,
                help: "Junction hand-offs performed",
                labels: vec![],
            },
            MetricDoc {
                name: component_metric!(counter, "flow", "rows_written"),
                metric_type: MetricType::Counter,
                help: "Rows written to sink files",
                labels: vec![],
            },
            MetricDoc {
                name: component_metric!(histogram, "flow", "run_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall-clock duration from queue priming to sink completion",
                labels: vec![],
            },
        ]
    }
}
