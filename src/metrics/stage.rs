//! Stage run metrics

use super::{component_metric, ComponentMetrics, MetricDoc, MetricType};
use std::time::Duration;

pub struct StageMetrics;

impl StageMetrics {
    /// Record a completed stage run.
    pub fn record_run_success(stage: &str, values: usize, elapsed: Duration) {
        ::metrics::counter!(component_metric!(counter, "stage", "runs_success"), "stage" => stage.to_string())
            .increment(1);
        ::metrics::counter!(component_metric!(counter, "stage", "values_produced"), "stage" => stage.to_string())
            .increment(values as u64);
        ::metrics::histogram!(component_metric!(histogram, "stage", "run_duration_seconds"), "stage" => stage.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn record_run_failure(stage: &str) {
        ::metrics::counter!(component_metric!(counter, "stage", "runs_error"), "stage" => stage.to_string())
            .increment(1);
    }
}

impl ComponentMetrics for StageMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(component_metric!(counter, "stage", "runs_success"));
        let _ = ::metrics::counter!(component_metric!(counter, "stage", "runs_error"));
        let _ = ::metrics::counter!(component_metric!(counter, "stage", "values_produced"));
        let _ = ::metrics::histogram!(component_metric!(histogram, "stage", "run_duration_seconds"));
    }

    fn component_name() -> &'static str {
        "stage"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: component_metric!(counter, "stage", "runs_success"),
                metric_type: MetricType::Counter,
                help: "Stage runs that produced output",
                labels: vec!["stage"],
            },
            MetricDoc {
                name: component_metric!(counter, "stage", "runs_error"),
                metric_type: MetricType::Counter,
                help: "Stage runs aborted by an error",
                labels: vec!["stage"],
            },
            MetricDoc {
                name: component_metric!(counter, "stage", "values_produced"),
                metric_type: MetricType::Counter,
                help: "Values written to stage outputs",
                labels: vec!["stage"],
            },
            MetricDoc {
                name: component_metric!(histogram, "stage", "run_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall-clock duration of a stage run",
                labels: vec!["stage"],
            },
        ]
    }
}
