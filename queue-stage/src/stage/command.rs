//! Lifecycle states and the typed command surface.

use crate::errors::StageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The operational state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// No queues bound yet.
    #[default]
    Unconfigured,
    /// Queues bound, worker not running.
    Configured,
    /// Worker running.
    Running,
    /// Worker exited on a fatal error; `stop` collects it.
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Configured => write!(f, "configured"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageState {
    /// Returns true if `command` is legal in this state.
    ///
    /// `configure` is accepted when already configured and is a no-op there.
    #[must_use]
    pub fn accepts(&self, command: CommandName) -> bool {
        matches!(
            (self, command),
            (Self::Unconfigured | Self::Configured, CommandName::Configure)
                | (Self::Configured, CommandName::Start)
                | (Self::Running | Self::Failed, CommandName::Stop)
        )
    }
}

/// The name of a lifecycle command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    /// Bind the stage to its queues.
    Configure,
    /// Start the worker.
    Start,
    /// Stop and join the worker.
    Stop,
}

impl CommandName {
    /// All command names, in registration order.
    pub const ALL: [Self; 3] = [Self::Start, Self::Stop, Self::Configure];

    /// Returns the wire name of the command.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| StageError::UnknownCommand { name: s.to_string() })
    }
}

/// A lifecycle command with its argument list.
///
/// The arguments are carried for control planes that send them; stages
/// ignore them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum StageCommand {
    /// Bind the stage to its queues.
    Configure {
        /// Unused arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Start the worker.
    Start {
        /// Unused arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Stop and join the worker.
    Stop {
        /// Unused arguments.
        #[serde(default)]
        args: Vec<String>,
    },
}

impl StageCommand {
    /// Builds a command from a string name, as received from a control plane.
    pub fn parse(name: &str, args: Vec<String>) -> Result<Self, StageError> {
        Ok(Self::new(name.parse()?, args))
    }

    /// Builds a command from its name.
    #[must_use]
    pub fn new(name: CommandName, args: Vec<String>) -> Self {
        match name {
            CommandName::Configure => Self::Configure { args },
            CommandName::Start => Self::Start { args },
            CommandName::Stop => Self::Stop { args },
        }
    }

    /// Returns the command's name.
    #[must_use]
    pub fn name(&self) -> CommandName {
        match self {
            Self::Configure { .. } => CommandName::Configure,
            Self::Start { .. } => CommandName::Start,
            Self::Stop { .. } => CommandName::Stop,
        }
    }

    /// Returns the argument list.
    #[must_use]
    pub fn args(&self) -> &[String] {
        match self {
            Self::Configure { args } | Self::Start { args } | Self::Stop { args } => args,
        }
    }
}
