//! Error types for queue stages.
//!
//! Queue timeouts are expected steady-state conditions and are absorbed by
//! the worker. Everything that crosses the stage boundary is a [`StageError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The role a queue plays for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueRole {
    /// The queue the stage pops input records from.
    Input,
    /// The queue the stage pushes output records to.
    Output,
}

impl QueueRole {
    /// Returns the configuration key naming this queue.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by queue operations and queue resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The operation did not complete within the timeout.
    #[error("Queue '{queue}' timed out after {timeout_ms} ms")]
    Timeout {
        /// The queue name.
        queue: String,
        /// The timeout that expired.
        timeout_ms: u64,
    },

    /// The other end of the queue has been dropped.
    #[error("Queue '{queue}' is closed")]
    Closed {
        /// The queue name.
        queue: String,
    },

    /// No queue is registered under the name.
    #[error("Queue not found: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// A queue exists under the name but carries a different record type.
    #[error("Queue '{name}' does not carry records of type {expected}")]
    TypeMismatch {
        /// The requested name.
        name: String,
        /// The record type the caller asked for.
        expected: &'static str,
    },
}

impl QueueError {
    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(queue: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            queue: queue.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a closed error.
    #[must_use]
    pub fn closed(queue: impl Into<String>) -> Self {
        Self::Closed { queue: queue.into() }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Returns true if this is the recoverable timeout condition.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A rejected push. Ownership of the record goes back to the caller so the
/// same record can be retried without cloning.
pub struct PushError<T> {
    item: T,
    reason: QueueError,
}

impl<T> PushError<T> {
    /// Creates a new push error.
    pub fn new(item: T, reason: QueueError) -> Self {
        Self { item, reason }
    }

    /// Returns why the push failed.
    pub fn reason(&self) -> &QueueError {
        &self.reason
    }

    /// Splits the error into the record and the reason.
    pub fn into_parts(self) -> (T, QueueError) {
        (self.item, self.reason)
    }

    /// Recovers the record.
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push rejected: {}", self.reason)
    }
}

/// The main error type for stage operations.
#[derive(Debug, Error)]
pub enum StageError {
    /// A queue could not be resolved during configuration.
    #[error("Stage '{stage}': invalid {role} queue: {source}")]
    InvalidQueue {
        /// The stage name.
        stage: String,
        /// Which binding failed.
        role: QueueRole,
        /// The underlying cause.
        #[source]
        source: QueueError,
    },

    /// The configuration is missing a key or has an ill-typed value.
    #[error("Stage '{stage}': invalid configuration: {message}")]
    Config {
        /// The stage name.
        stage: String,
        /// What was wrong.
        message: String,
    },

    /// A command was issued in a state that does not allow it.
    #[error("Stage '{stage}': cannot {command} while {state}")]
    InvalidTransition {
        /// The stage name.
        stage: String,
        /// The rejected command.
        command: String,
        /// The state the stage was in.
        state: String,
    },

    /// The transform failed on a record.
    #[error("Stage '{stage}': transform '{transform}' failed: {source}")]
    Transform {
        /// The stage name.
        stage: String,
        /// The transform's name.
        transform: String,
        /// The transform's error.
        #[source]
        source: anyhow::Error,
    },

    /// A queue was disconnected while the worker was using it.
    #[error("Stage '{stage}': {role} queue '{queue}' closed")]
    QueueClosed {
        /// The stage name.
        stage: String,
        /// Which binding closed.
        role: QueueRole,
        /// The queue name.
        queue: String,
    },

    /// The worker task panicked or was aborted.
    #[error("Stage '{stage}': worker panicked: {message}")]
    WorkerPanicked {
        /// The stage name.
        stage: String,
        /// The join error message.
        message: String,
    },

    /// A command name did not match any known command.
    #[error("Unknown command: {name}")]
    UnknownCommand {
        /// The unrecognised name.
        name: String,
    },
}

impl StageError {
    /// Creates an invalid queue error.
    #[must_use]
    pub fn invalid_queue(stage: impl Into<String>, role: QueueRole, source: QueueError) -> Self {
        Self::InvalidQueue {
            stage: stage.into(),
            role,
            source,
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid transition error.
    #[must_use]
    pub fn invalid_transition(
        stage: impl Into<String>,
        command: impl fmt::Display,
        state: impl fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            stage: stage.into(),
            command: command.to_string(),
            state: state.to_string(),
        }
    }

    /// Returns the queue role for queue-related errors.
    #[must_use]
    pub fn queue_role(&self) -> Option<QueueRole> {
        match self {
            Self::InvalidQueue { role, .. } | Self::QueueClosed { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Returns true if the stage cannot continue after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InvalidTransition { .. } | Self::UnknownCommand { .. }
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        let kind = match self {
            Self::InvalidQueue { .. } => "InvalidQueueFatalError",
            Self::Config { .. } => "StageConfigError",
            Self::InvalidTransition { .. } => "InvalidTransitionError",
            Self::Transform { .. } => "TransformError",
            Self::QueueClosed { .. } => "QueueClosedError",
            Self::WorkerPanicked { .. } => "WorkerPanickedError",
            Self::UnknownCommand { .. } => "UnknownCommandError",
        };
        map.insert("type".to_string(), serde_json::json!(kind));
        if let Self::Transform { transform, .. } = self {
            map.insert("transform".to_string(), serde_json::json!(transform));
        }
        if let Some(role) = self.queue_role() {
            map.insert("role".to_string(), serde_json::json!(role));
        }
        map.insert("fatal".to_string(), serde_json::json!(self.is_fatal()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_queue_role_display() {
        assert_eq!(QueueRole::Input.to_string(), "input");
        assert_eq!(QueueRole::Output.to_string(), "output");
    }

    #[test]
    fn test_queue_error_timeout() {
        let err = QueueError::timeout("tas", Duration::from_millis(100));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Queue 'tas' timed out after 100 ms");

        assert!(!QueueError::closed("tas").is_timeout());
    }

    #[test]
    fn test_push_error_returns_item() {
        let err = PushError::new(42_u32, QueueError::closed("out"));
        assert_eq!(err.reason(), &QueueError::closed("out"));
        assert_eq!(err.into_inner(), 42);
    }

    #[test]
    fn test_invalid_queue_carries_role_and_cause() {
        let err = StageError::invalid_queue("maker", QueueRole::Input, QueueError::not_found("tps"));

        assert_eq!(err.queue_role(), Some(QueueRole::Input));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("invalid input queue"));
        assert!(err.to_string().contains("tps"));

        let source = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(source, Some("Queue not found: tps".to_string()));
    }

    #[test]
    fn test_invalid_transition_not_fatal() {
        let err = StageError::invalid_transition("maker", "stop", "configured");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Stage 'maker': cannot stop while configured");
    }

    #[test]
    fn test_stage_error_to_dict() {
        let err = StageError::invalid_queue("maker", QueueRole::Output, QueueError::not_found("x"));
        let dict = err.to_dict();

        assert_eq!(dict["type"], "InvalidQueueFatalError");
        assert_eq!(dict["role"], "output");
        assert_eq!(dict["fatal"], true);
    }

    #[test]
    fn test_transform_error_names_transform() {
        let err = StageError::Transform {
            stage: "maker".to_string(),
            transform: "cluster".to_string(),
            source: anyhow::anyhow!("no detector map"),
        };

        assert_eq!(
            err.to_string(),
            "Stage 'maker': transform 'cluster' failed: no detector map"
        );
        assert_eq!(err.to_dict()["transform"], "cluster");
        assert!(err.is_fatal());
    }
}
