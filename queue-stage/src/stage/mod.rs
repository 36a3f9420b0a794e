//! Stage lifecycle control.
//!
//! A stage moves through `Unconfigured -> Configured -> Running -> Configured
//! -> Running -> ...`, driven by [`StageCommand`]s.

mod command;
mod queue_stage;

pub use command::{CommandName, StageCommand, StageState};
pub use queue_stage::QueueStage;

use crate::errors::StageError;
use async_trait::async_trait;

/// Trait for anything driven by lifecycle commands.
///
/// Lets a control plane hold heterogeneous stages behind one interface.
#[async_trait]
pub trait StageControl: Send {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Returns the current lifecycle state.
    fn state(&self) -> StageState;

    /// Executes a lifecycle command.
    async fn execute(&mut self, command: StageCommand) -> Result<(), StageError>;

    /// Parses a command name and executes it.
    async fn execute_named(&mut self, name: &str, args: Vec<String>) -> Result<(), StageError> {
        let command = StageCommand::parse(name, args)?;
        self.execute(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueRegistry;
    use crate::transform::map_transform;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_control_plane_drives_boxed_stages() {
        let registry = Arc::new(QueueRegistry::new());
        registry.create_bounded::<u32>("a", 4);
        registry.create_bounded::<u32>("b", 4);
        registry.create_bounded::<String>("c", 4);

        let mut stages: Vec<Box<dyn StageControl>> = vec![
            Box::new(QueueStage::<u32, u32>::new(
                "double",
                map_transform("double", |x: &u32| x * 2),
                registry.clone(),
                serde_json::json!({"input": "a", "output": "b", "queue_timeout_ms": 5}),
            )),
            Box::new(QueueStage::<u32, String>::new(
                "format",
                map_transform("format", |x: &u32| x.to_string()),
                registry.clone(),
                serde_json::json!({"input": "b", "output": "c", "queue_timeout_ms": 5}),
            )),
        ];

        for name in ["configure", "start"] {
            for stage in &mut stages {
                stage.execute_named(name, Vec::new()).await.unwrap();
            }
        }
        assert!(stages.iter().all(|s| s.state() == StageState::Running));

        for stage in stages.iter_mut().rev() {
            stage.execute_named("stop", Vec::new()).await.unwrap();
        }
        assert!(stages.iter().all(|s| s.state() == StageState::Configured));
    }

    #[tokio::test]
    async fn test_execute_named_unknown() {
        let mut stage: Box<dyn StageControl> = Box::new(QueueStage::<u32, u32>::new(
            "double",
            map_transform("double", |x: &u32| x * 2),
            Arc::new(QueueRegistry::new()),
            serde_json::json!({}),
        ));

        let err = stage.execute_named("pause", Vec::new()).await.unwrap_err();
        assert!(matches!(err, StageError::UnknownCommand { .. }));
        assert_eq!(stage.name(), "double");
    }
}
