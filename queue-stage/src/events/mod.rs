//! Operational events emitted by stages.
//!
//! Events complement the `tracing` output with structured records that an
//! embedding process (or a test) can consume directly.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Queues bound during configure.
pub const STAGE_CONFIGURED: &str = "stage.configured";
/// Worker started.
pub const STAGE_STARTED: &str = "stage.started";
/// Worker stopped and joined.
pub const STAGE_STOPPED: &str = "stage.stopped";
/// Worker terminated on a fatal error.
pub const STAGE_FAILED: &str = "stage.failed";
/// A push attempt timed out and will be retried.
pub const PUSH_TIMEOUT: &str = "queue.push_timeout";
/// Final counts of a worker run.
pub const WORKER_SUMMARY: &str = "worker.summary";
