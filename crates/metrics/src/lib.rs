//! Metrics collection and export for relay.
//!
//! Thin layer over the `metrics` facade: metric names and label keys are
//! defined once here, and the Prometheus recorder renders them for the
//! `/metrics` endpoint.
//!
//! ```rust,ignore
//! use relay_metrics::{counter, labels, names};
//!
//! counter!(names::REQUESTS_TOTAL,
//!     labels::TENANT => tenant.to_string(),
//!     labels::COMPONENT => "gateway",
//! )
//! .increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::{labels, names},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
