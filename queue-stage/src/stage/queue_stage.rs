//! The lifecycle controller for a single queue-to-queue stage.

use super::{CommandName, StageCommand, StageControl, StageState};
use crate::cancellation::CancellationToken;
use crate::config::StageConfig;
use crate::errors::{QueueRole, StageError};
use crate::events::{self, EventSink, LoggingEventSink};
use crate::queue::{InputQueue, OutputQueue, QueueRegistry};
use crate::transform::Transform;
use crate::worker::{CounterSnapshot, StageCounters, Worker, WorkerReport};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, info_span, trace, Instrument};
use uuid::Uuid;

/// Queue bindings, set once by configure.
struct Bindings<I, O> {
    input: Arc<dyn InputQueue<I>>,
    output: Arc<dyn OutputQueue<O>>,
    timeout: Duration,
}

/// A worker run in progress.
struct ActiveRun {
    run_id: Uuid,
    token: Arc<CancellationToken>,
    handle: JoinHandle<Result<WorkerReport, StageError>>,
}

/// A stage that pops records from one queue, transforms them, and pushes
/// the results to another.
///
/// ```rust,ignore
/// let registry = Arc::new(QueueRegistry::new());
/// registry.create_bounded::<Primitive>("tps", 1000);
/// registry.create_bounded::<Activity>("tas", 1000);
///
/// let mut stage = QueueStage::new("activity_maker", maker, registry, config);
/// stage.configure()?;
/// stage.start()?;
/// // ...
/// let report = stage.stop().await?;
/// ```
pub struct QueueStage<I, O> {
    name: String,
    config: serde_json::Value,
    registry: Arc<QueueRegistry>,
    transform: Arc<dyn Transform<I, O>>,
    events: Arc<dyn EventSink>,
    bindings: Option<Bindings<I, O>>,
    active: Option<ActiveRun>,
    counters: Arc<StageCounters>,
    last_report: Option<WorkerReport>,
}

impl<I, O> QueueStage<I, O>
where
    I: Send + 'static,
    O: Send + Debug + 'static,
{
    /// Creates an unconfigured stage.
    ///
    /// `config` is resolved against `registry` when the stage is configured.
    pub fn new(
        name: impl Into<String>,
        transform: impl Transform<I, O> + 'static,
        registry: Arc<QueueRegistry>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            registry,
            transform: Arc::new(transform),
            events: Arc::new(LoggingEventSink::default()),
            bindings: None,
            active: None,
            counters: Arc::new(StageCounters::new()),
            last_report: None,
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current lifecycle state.
    ///
    /// A run whose worker has already exited is [`StageState::Failed`]: the
    /// worker only returns on its own after a fatal error.
    #[must_use]
    pub fn state(&self) -> StageState {
        if let Some(run) = &self.active {
            if run.handle.is_finished() {
                StageState::Failed
            } else {
                StageState::Running
            }
        } else if self.bindings.is_some() {
            StageState::Configured
        } else {
            StageState::Unconfigured
        }
    }

    /// Returns true while the worker is still polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == StageState::Running
    }

    /// Returns the cumulative counters across all runs.
    ///
    /// Exact only while the stage is not running.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Returns the report of the most recent completed run.
    #[must_use]
    pub fn last_report(&self) -> Option<&WorkerReport> {
        self.last_report.as_ref()
    }

    /// Returns the id of the active run.
    #[must_use]
    pub fn run_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|run| run.run_id)
    }

    /// Returns the bound queue name for a role.
    #[must_use]
    pub fn queue_name(&self, role: QueueRole) -> Option<&str> {
        self.bindings.as_ref().map(|b| match role {
            QueueRole::Input => b.input.name(),
            QueueRole::Output => b.output.name(),
        })
    }

    fn check(&self, command: CommandName) -> Result<(), StageError> {
        let state = self.state();
        if state.accepts(command) {
            Ok(())
        } else {
            Err(StageError::invalid_transition(&self.name, command, state))
        }
    }

    /// Binds the stage to its input and output queues.
    ///
    /// A second configure is a no-op: bindings never change once set.
    pub fn configure(&mut self) -> Result<(), StageError> {
        trace!(stage = %self.name, "Entering configure");
        self.check(CommandName::Configure)?;

        if self.bindings.is_some() {
            info!(stage = %self.name, "Already configured, keeping existing queue bindings");
            trace!(stage = %self.name, "Exiting configure");
            return Ok(());
        }

        let config = StageConfig::from_value(&self.name, &self.config)?;
        let input = self
            .registry
            .input::<I>(&config.input)
            .map_err(|e| StageError::invalid_queue(&self.name, QueueRole::Input, e))?;
        let output = self
            .registry
            .output::<O>(&config.output)
            .map_err(|e| StageError::invalid_queue(&self.name, QueueRole::Output, e))?;

        self.bindings = Some(Bindings {
            input,
            output,
            timeout: config.queue_timeout(),
        });

        info!(
            stage = %self.name,
            input = %config.input,
            output = %config.output,
            timeout_ms = config.queue_timeout_ms,
            "{} successfully configured",
            self.name
        );
        self.events.try_emit(
            events::STAGE_CONFIGURED,
            Some(serde_json::json!({
                "stage": self.name,
                "input": config.input,
                "output": config.output,
                "queue_timeout_ms": config.queue_timeout_ms,
            })),
        );
        trace!(stage = %self.name, "Exiting configure");
        Ok(())
    }

    /// Starts a worker run on its own task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<Uuid, StageError> {
        trace!(stage = %self.name, "Entering start");
        self.check(CommandName::Start)?;
        let Some(bindings) = self.bindings.as_ref() else {
            return Err(StageError::invalid_transition(
                &self.name,
                CommandName::Start,
                StageState::Unconfigured,
            ));
        };

        let worker = Worker::new(
            self.name.clone(),
            Arc::clone(&bindings.input),
            Arc::clone(&bindings.output),
            Arc::clone(&self.transform),
            bindings.timeout,
            Arc::clone(&self.counters),
            Arc::clone(&self.events),
        );
        let run_id = worker.run_id();
        let token = Arc::new(CancellationToken::new());
        let span = info_span!(
            "worker",
            stage = %self.name,
            transform = self.transform.name(),
            run_id = %run_id
        );
        let handle = tokio::spawn(worker.run(Arc::clone(&token)).instrument(span));

        self.active = Some(ActiveRun {
            run_id,
            token,
            handle,
        });

        info!(stage = %self.name, run_id = %run_id, "{} successfully started", self.name);
        self.events.try_emit(
            events::STAGE_STARTED,
            Some(serde_json::json!({"stage": self.name, "run_id": run_id.to_string()})),
        );
        trace!(stage = %self.name, "Exiting start");
        Ok(run_id)
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Returns the run's report, or the fatal error that ended the run.
    /// Also accepted in [`StageState::Failed`] to collect that error.
    /// Either way the stage is back in [`StageState::Configured`].
    pub async fn stop(&mut self) -> Result<WorkerReport, StageError> {
        trace!(stage = %self.name, "Entering stop");
        self.check(CommandName::Stop)?;
        let Some(run) = self.active.take() else {
            return Err(StageError::invalid_transition(
                &self.name,
                CommandName::Stop,
                self.state(),
            ));
        };

        run.token.cancel("stop command");
        let report = match run.handle.await {
            Ok(result) => result?,
            Err(join_error) => {
                return Err(StageError::WorkerPanicked {
                    stage: self.name.clone(),
                    message: join_error.to_string(),
                })
            }
        };

        info!(
            stage = %self.name,
            run_id = %report.run_id,
            received = report.counts.received,
            sent = report.counts.sent,
            "{} successfully stopped",
            self.name
        );
        self.events
            .emit(events::STAGE_STOPPED, Some(report.to_value()))
            .await;
        self.last_report = Some(report.clone());
        trace!(stage = %self.name, "Exiting stop");
        Ok(report)
    }
}

#[async_trait]
impl<I, O> StageControl for QueueStage<I, O>
where
    I: Send + 'static,
    O: Send + Debug + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> StageState {
        QueueStage::state(self)
    }

    async fn execute(&mut self, command: StageCommand) -> Result<(), StageError> {
        match command {
            StageCommand::Configure { .. } => self.configure(),
            StageCommand::Start { .. } => self.start().map(|_| ()),
            StageCommand::Stop { .. } => self.stop().await.map(|_| ()),
        }
    }
}

impl<I, O> Debug for QueueStage<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStage")
            .field("name", &self.name)
            .field("configured", &self.bindings.is_some())
            .field("running", &self.active.is_some())
            .field("counters", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl<I, O> Drop for QueueStage<I, O> {
    fn drop(&mut self) {
        // The detached worker exits at its next check point; pending outputs are lost.
        if let Some(run) = self.active.take() {
            run.token.cancel("stage dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::{RecordingOutput, ScriptedInput, TimeoutOutput};
    use crate::transform::{map_transform, FnTransform};
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn config(input: &str, output: &str) -> serde_json::Value {
        serde_json::json!({"input": input, "output": output, "queue_timeout_ms": 5})
    }

    fn doubling_stage(registry: Arc<QueueRegistry>, cfg: serde_json::Value) -> QueueStage<u32, u32> {
        QueueStage::new("doubler", map_transform("double", |x: &u32| x * 2), registry, cfg)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_initial_state() {
        let stage = doubling_stage(Arc::new(QueueRegistry::new()), config("a", "b"));
        assert_eq!(stage.state(), StageState::Unconfigured);
        assert!(!stage.is_running());
        assert!(stage.last_report().is_none());
        assert_eq!(stage.counters(), CounterSnapshot::default());
    }

    #[tokio::test]
    async fn test_configure_binds_queues() {
        let registry = Arc::new(QueueRegistry::new());
        registry.create_bounded::<u32>("tps", 4);
        registry.create_bounded::<u32>("tas", 4);
        let sink = Arc::new(CollectingEventSink::new());

        let mut stage = doubling_stage(registry, config("tps", "tas")).with_event_sink(sink.clone());
        assert_ok!(stage.configure());

        assert_eq!(stage.state(), StageState::Configured);
        assert_eq!(stage.queue_name(QueueRole::Input), Some("tps"));
        assert_eq!(stage.queue_name(QueueRole::Output), Some("tas"));
        assert_eq!(sink.count(events::STAGE_CONFIGURED), 1);
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_bindings() {
        let registry = Arc::new(QueueRegistry::new());
        registry.create_bounded::<u32>("tps", 4);
        registry.create_bounded::<u32>("tas", 4);
        let mut stage = doubling_stage(registry.clone(), config("tps", "tas"));
        stage.configure().unwrap();

        registry.remove("tps");
        assert_ok!(stage.configure());
        assert_eq!(stage.queue_name(QueueRole::Input), Some("tps"));
    }

    #[tokio::test]
    async fn test_configure_bad_output_name() {
        let registry = Arc::new(QueueRegistry::new());
        registry.create_bounded::<u32>("tps", 4);
        let mut stage = doubling_stage(registry, config("tps", "nowhere"));

        let err = stage.configure().unwrap_err();
        assert_eq!(err.queue_role(), Some(QueueRole::Output));
        assert_eq!(stage.state(), StageState::Unconfigured);
    }

    #[tokio::test]
    async fn test_configure_wrong_record_type() {
        let registry = Arc::new(QueueRegistry::new());
        registry.create_bounded::<String>("tps", 4);
        registry.create_bounded::<u32>("tas", 4);
        let mut stage = doubling_stage(registry, config("tps", "tas"));

        let err = stage.configure().unwrap_err();
        assert!(matches!(
            err,
            StageError::InvalidQueue {
                role: QueueRole::Input,
                source: crate::errors::QueueError::TypeMismatch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_configure_missing_key() {
        let mut stage = doubling_stage(Arc::new(QueueRegistry::new()), serde_json::json!({"input": "a"}));
        let err = stage.configure().unwrap_err();
        assert!(matches!(err, StageError::Config { .. }));
    }

    #[tokio::test]
    async fn test_start_requires_configure() {
        let mut stage = doubling_stage(Arc::new(QueueRegistry::new()), config("a", "b"));
        let err = stage.start().unwrap_err();
        assert!(matches!(err, StageError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Stage 'doubler': cannot start while unconfigured");
    }

    #[tokio::test]
    async fn test_stop_requires_running() {
        let registry = Arc::new(QueueRegistry::new());
        registry.create_bounded::<u32>("tps", 4);
        registry.create_bounded::<u32>("tas", 4);
        let mut stage = doubling_stage(registry, config("tps", "tas"));
        stage.configure().unwrap();

        assert_err!(stage.stop().await);
    }

    #[tokio::test]
    async fn test_start_stop_cycles_keep_counters() {
        let registry = Arc::new(QueueRegistry::new());
        let tps = registry.create_bounded::<u32>("tps", 8);
        let tas = registry.create_bounded::<u32>("tas", 8);
        let mut stage = doubling_stage(registry, config("tps", "tas"));
        stage.configure().unwrap();

        for round in 1..=2_u32 {
            let run_id = stage.start().unwrap();
            assert_eq!(stage.run_id(), Some(run_id));
            assert_eq!(stage.state(), StageState::Running);
            assert_err!(stage.start());
            assert_err!(stage.configure());

            tps.push(round, Duration::from_millis(5)).await.unwrap();
            wait_until(|| tas.len() == 1).await;

            let report = stage.stop().await.unwrap();
            assert_eq!(report.run_id, run_id);
            assert_eq!(report.counts.received, 1);
            assert_eq!(tas.drain().await, vec![round * 2]);
            assert_eq!(stage.state(), StageState::Configured);
        }

        assert_eq!(stage.counters().received, 2);
        assert_eq!(stage.counters().sent, 2);
    }

    #[tokio::test]
    async fn test_stop_returns_transform_error() {
        let registry = Arc::new(QueueRegistry::new());
        let input = Arc::new(ScriptedInput::new("in", vec![1_u32]));
        registry.register_input::<u32>("in", input);
        registry.register_output::<u32>("out", Arc::new(RecordingOutput::<u32>::new("out")));
        let transform = FnTransform::new("broken", |_: &u32, _: &mut Vec<u32>| -> anyhow::Result<()> {
            anyhow::bail!("detector map missing")
        });
        let sink = Arc::new(CollectingEventSink::new());
        let mut stage: QueueStage<u32, u32> = QueueStage::new("broken", transform, registry, config("in", "out"))
            .with_event_sink(sink.clone());
        stage.configure().unwrap();
        stage.start().unwrap();

        wait_until(|| stage.state() == StageState::Failed).await;
        assert_eq!(sink.count(events::STAGE_FAILED), 1);
        assert!(!stage.is_running());
        assert_eq!(
            stage.start().unwrap_err().to_string(),
            "Stage 'broken': cannot start while failed"
        );
        assert_err!(stage.configure());

        let err = stage.stop().await.unwrap_err();
        assert!(matches!(err, StageError::Transform { ref transform, .. } if transform == "broken"));
        assert_eq!(stage.state(), StageState::Configured);
        assert!(!stage.is_running());
        assert!(stage.last_report().is_none());
    }

    #[tokio::test]
    async fn test_execute_dispatches_commands() {
        let registry = Arc::new(QueueRegistry::new());
        registry.create_bounded::<u32>("tps", 4);
        registry.create_bounded::<u32>("tas", 4);
        let sink = Arc::new(CollectingEventSink::new());
        let mut stage = doubling_stage(registry, config("tps", "tas")).with_event_sink(sink.clone());

        for name in ["configure", "start", "stop"] {
            let command = StageCommand::parse(name, Vec::new()).unwrap();
            stage.execute(command).await.unwrap();
        }

        assert_eq!(StageControl::state(&stage), StageState::Configured);
        assert_eq!(sink.count(events::STAGE_STARTED), 1);
        assert_eq!(sink.count(events::STAGE_STOPPED), 1);
        assert!(stage.last_report().is_some());
    }

    #[tokio::test]
    async fn test_drop_cancels_worker() {
        let registry = Arc::new(QueueRegistry::new());
        let input = Arc::new(ScriptedInput::new("in", vec![1_u32]));
        let output = Arc::new(TimeoutOutput::<u32>::new("out"));
        registry.register_input::<u32>("in", input);
        registry.register_output::<u32>("out", output.clone());
        let sink = Arc::new(CollectingEventSink::new());

        let mut stage = doubling_stage(registry, config("in", "out")).with_event_sink(sink.clone());
        stage.configure().unwrap();
        stage.start().unwrap();
        wait_until(|| output.attempts() >= 1).await;
        drop(stage);

        wait_until(|| sink.count(events::WORKER_SUMMARY) == 1).await;
        let summary = sink.events_of_type(events::WORKER_SUMMARY)[0].clone().unwrap();
        assert_eq!(summary["abandoned"], 1);
    }
}
