//! Webhook ingestion and stream processing.
//!
//! Ingress verifies, deduplicates, and enqueues within a tight latency
//! budget; workers consume with pending-first reads, idempotent effects,
//! bounded retries, and dead-lettering; a periodic maintainer moves entries
//! through the hot → warm → cold lifecycle.

pub mod archive;
pub mod dedup;
pub mod error;
pub mod ingress;
pub mod lifecycle;
pub mod signature;
pub mod types;
pub mod worker;

pub use {
    archive::FsArchive,
    dedup::DedupFilter,
    error::WebhookError,
    ingress::{IngressOutcome, WebhookIngress},
    lifecycle::{LifecycleMaintainer, LifecycleOptions},
    signature::verify_signature,
    types::WebhookEvent,
    worker::{HandlerVerdict, WebhookHandler, WorkerOptions, WorkerPool},
};
