//! # Queue Stage
//!
//! One stage of a streaming pipeline: drain records from an input queue,
//! transform each into zero or more outputs, and push every output to a
//! downstream queue, under external `configure` / `start` / `stop` control.
//!
//! - **Lifecycle control**: typed commands drive `Unconfigured -> Configured
//!   -> Running` and back
//! - **Worker loop**: timeout-bounded polling with cooperative cancellation
//! - **Backpressure**: a push that times out is retried on the same record,
//!   with a warning per attempt, until it succeeds or the stage stops
//! - **Pluggable transforms**: the stage holds a [`Transform`] by composition
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use queue_stage::prelude::*;
//!
//! let registry = Arc::new(QueueRegistry::new());
//! registry.create_bounded::<u32>("numbers", 100);
//! registry.create_bounded::<u32>("doubled", 100);
//!
//! let mut stage = QueueStage::new(
//!     "doubler",
//!     map_transform("double", |x: &u32| x * 2),
//!     registry,
//!     serde_json::json!({"input": "numbers", "output": "doubled"}),
//! );
//! stage.configure()?;
//! stage.start()?;
//! // ...
//! let report = stage.stop().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod queue;
pub mod stage;
pub mod testing;
pub mod transform;
pub mod worker;

pub use transform::Transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::StageConfig;
    pub use crate::errors::{PushError, QueueError, QueueRole, StageError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat, LoggingConfig};
    pub use crate::queue::{BoundedQueue, InputQueue, OutputQueue, QueueRegistry};
    pub use crate::stage::{CommandName, QueueStage, StageCommand, StageControl, StageState};
    pub use crate::transform::{map_transform, FnTransform, Transform};
    pub use crate::worker::{CounterSnapshot, StageCounters, WorkerReport};
}
