//! Metrics recorder initialization.

use {anyhow::Result, tracing::info};

use crate::definitions::{buckets, names};

/// Handle to the metrics system, providing access to exported metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled. A disabled recorder still
    /// installs so `/metrics` renders (empty) rather than erroring.
    pub enabled: bool,
    /// Global labels added to all metrics.
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system. Call once at startup.
///
/// # Errors
///
/// Returns an error if a recorder is already installed in this process.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

    if !config.enabled {
        info!("metrics collection is disabled");
        let handle = PrometheusBuilder::new().install_recorder()?;
        return Ok(MetricsHandle {
            prometheus_handle: handle,
        });
    }

    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::REQUEST_DURATION_SECONDS.to_string()),
            buckets::REQUEST_DURATION,
        )?
        .set_buckets_for_metric(
            Matcher::Full(names::WEBHOOK_ENQUEUE_LATENCY_SECONDS.to_string()),
            buckets::ENQUEUE_LATENCY,
        )?
        .set_buckets_for_metric(
            Matcher::Full(names::TASK_WAIT_SECONDS.to_string()),
            buckets::TASK_WAIT,
        )?;

    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    let handle = builder.install_recorder()?;
    info!("prometheus metrics exporter initialized");
    Ok(MetricsHandle {
        prometheus_handle: handle,
    })
}
