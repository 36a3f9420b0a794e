//! Logging setup.
//!
//! Stages log through `tracing`; embedding processes call [`init_tracing`]
//! once to install a subscriber.

mod subscriber;

pub use subscriber::{init_tracing, LogFormat, LoggingConfig};
