//! Queue endpoints consumed by a stage.
//!
//! A stage pops from exactly one [`InputQueue`] and pushes to exactly one
//! [`OutputQueue`]. Both operations are bounded by a timeout and report
//! [`QueueError::Timeout`] instead of blocking indefinitely.

mod bounded;
mod registry;

pub use bounded::BoundedQueue;
pub use registry::QueueRegistry;

use crate::errors::{PushError, QueueError};
use async_trait::async_trait;
use std::time::Duration;

/// The receiving side of a queue.
#[async_trait]
pub trait InputQueue<T: Send + 'static>: Send + Sync {
    /// Returns the queue name for diagnostics.
    fn name(&self) -> &str;

    /// Pops the next record, waiting at most `timeout`.
    async fn pop(&self, timeout: Duration) -> Result<T, QueueError>;
}

/// The sending side of a queue.
#[async_trait]
pub trait OutputQueue<T: Send + 'static>: Send + Sync {
    /// Returns the queue name for diagnostics.
    fn name(&self) -> &str;

    /// Pushes a record, waiting at most `timeout` for capacity.
    ///
    /// On failure the record is handed back inside the [`PushError`].
    async fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>>;
}
