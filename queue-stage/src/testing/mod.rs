//! Testing utilities for queue stages.
//!
//! This module provides scripted queue endpoints whose timeout behaviour
//! is fully controlled by the test.

mod queues;

pub use queues::{RecordingOutput, ScriptedInput, TimeoutOutput};
