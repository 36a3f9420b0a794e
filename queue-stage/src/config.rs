//! Stage configuration.
//!
//! A stage is configured from a key-value structure naming its two queues:
//!
//! ```json
//! { "input": "trigger_primitives", "output": "trigger_activities", "queue_timeout_ms": 100 }
//! ```

use crate::errors::{QueueRole, StageError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default pop/push timeout in milliseconds.
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 100;

fn default_queue_timeout_ms() -> u64 {
    DEFAULT_QUEUE_TIMEOUT_MS
}

/// Configuration for a queue stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Name of the queue to pop input records from.
    pub input: String,
    /// Name of the queue to push output records to.
    pub output: String,
    /// Timeout applied to every pop and push, in milliseconds.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

impl StageConfig {
    /// Creates a config with the default queue timeout.
    #[must_use]
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            queue_timeout_ms: DEFAULT_QUEUE_TIMEOUT_MS,
        }
    }

    /// Sets the queue timeout.
    #[must_use]
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Parses and validates a config from a JSON value.
    pub fn from_value(stage: &str, value: &serde_json::Value) -> Result<Self, StageError> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| StageError::config(stage, e.to_string()))?;
        config.validate(stage)?;
        Ok(config)
    }

    /// Checks that the queue names are present and the timeout is usable.
    pub fn validate(&self, stage: &str) -> Result<(), StageError> {
        for role in [QueueRole::Input, QueueRole::Output] {
            if self.queue_name(role).trim().is_empty() {
                return Err(StageError::config(
                    stage,
                    format!("'{role}' queue name must not be empty"),
                ));
            }
        }
        if self.queue_timeout_ms == 0 {
            return Err(StageError::config(stage, "queue_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Returns the queue name bound to a role.
    #[must_use]
    pub fn queue_name(&self, role: QueueRole) -> &str {
        match role {
            QueueRole::Input => &self.input,
            QueueRole::Output => &self.output,
        }
    }

    /// Returns the queue timeout as a duration.
    #[must_use]
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}
