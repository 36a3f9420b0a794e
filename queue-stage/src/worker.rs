//! The worker loop: poll, transform, deliver.
//!
//! One worker run lasts from `start` to `stop`. Each iteration pops one
//! input record, transforms it, and pushes every produced output before the
//! next pop. Pop timeouts are silent; push timeouts are retried on the same
//! record with a warning until the push succeeds or the run is cancelled.

use crate::cancellation::CancellationToken;
use crate::errors::{QueueRole, StageError};
use crate::events::{self, EventSink};
use crate::queue::{InputQueue, OutputQueue};
use crate::transform::Transform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Cumulative counters for a stage, persisted across stop/start cycles.
///
/// Only the worker writes them. Values are exact once `stop` has returned.
#[derive(Debug, Default)]
pub struct StageCounters {
    received: AtomicU64,
    sent: AtomicU64,
    abandoned: AtomicU64,
    push_timeouts: AtomicU64,
}

impl StageCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of input records popped.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    /// Returns the number of output records delivered.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Returns the number of output records dropped at shutdown.
    #[must_use]
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Returns the number of push attempts that timed out.
    #[must_use]
    pub fn push_timeouts(&self) -> u64 {
        self.push_timeouts.load(Ordering::Acquire)
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received(),
            sent: self.sent(),
            abandoned: self.abandoned(),
            push_timeouts: self.push_timeouts(),
        }
    }

    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::AcqRel);
    }
}

/// Plain copy of [`StageCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Input records popped.
    pub received: u64,
    /// Output records delivered.
    pub sent: u64,
    /// Output records dropped at shutdown.
    pub abandoned: u64,
    /// Push attempts that timed out.
    pub push_timeouts: u64,
}

/// Summary of one worker run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// Stage name.
    pub stage: String,
    /// When the worker started.
    pub started_at: DateTime<Utc>,
    /// When the worker exited.
    pub ended_at: DateTime<Utc>,
    /// Counts for this run only.
    pub counts: CounterSnapshot,
}

impl WorkerReport {
    /// Returns the run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Converts the report to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "stage": self.stage,
            "received": self.counts.received,
            "sent": self.counts.sent,
            "abandoned": self.counts.abandoned,
            "push_timeouts": self.counts.push_timeouts,
            "duration_ms": self.duration_ms(),
        })
    }
}

/// Outcome of delivering one batch.
enum Delivery {
    Complete,
    Abandoned,
    Closed,
}

/// The worker half of a stage, moved into its task for one run.
pub struct Worker<I, O> {
    stage: String,
    run_id: Uuid,
    input: Arc<dyn InputQueue<I>>,
    output: Arc<dyn OutputQueue<O>>,
    transform: Arc<dyn Transform<I, O>>,
    timeout: Duration,
    counters: Arc<StageCounters>,
    events: Arc<dyn EventSink>,
    tally: CounterSnapshot,
}

impl<I, O> Worker<I, O>
where
    I: Send + 'static,
    O: Send + Debug + 'static,
{
    /// Creates a worker for one run.
    pub fn new(
        stage: impl Into<String>,
        input: Arc<dyn InputQueue<I>>,
        output: Arc<dyn OutputQueue<O>>,
        transform: Arc<dyn Transform<I, O>>,
        timeout: Duration,
        counters: Arc<StageCounters>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            stage: stage.into(),
            run_id: Uuid::new_v4(),
            input,
            output,
            transform,
            timeout,
            counters,
            events,
            tally: CounterSnapshot::default(),
        }
    }

    /// Returns the id of this run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Runs until `token` is cancelled or a fatal error occurs.
    pub async fn run(mut self, token: Arc<CancellationToken>) -> Result<WorkerReport, StageError> {
        trace!(stage = %self.stage, "Entering worker run");
        let started_at = Utc::now();

        let result = self.poll_loop(&token).await;

        let report = WorkerReport {
            run_id: self.run_id,
            stage: self.stage.clone(),
            started_at,
            ended_at: Utc::now(),
            counts: self.tally,
        };
        info!(
            stage = %self.stage,
            run_id = %self.run_id,
            received = report.counts.received,
            sent = report.counts.sent,
            abandoned = report.counts.abandoned,
            "Exiting worker, received {} inputs and successfully sent {} outputs",
            report.counts.received,
            report.counts.sent,
        );
        self.events
            .emit(events::WORKER_SUMMARY, Some(report.to_value()))
            .await;

        match result {
            Ok(()) => {
                trace!(stage = %self.stage, "Exiting worker run");
                Ok(report)
            }
            Err(err) => {
                error!(stage = %self.stage, error = %err, "Worker terminated");
                self.events
                    .emit(events::STAGE_FAILED, Some(serde_json::json!(err.to_dict())))
                    .await;
                Err(err)
            }
        }
    }

    async fn poll_loop(&mut self, token: &CancellationToken) -> Result<(), StageError> {
        while token.is_running() {
            trace!(stage = %self.stage, queue = self.input.name(), "Going to receive data from input queue");
            let record = match self.input.pop(self.timeout).await {
                Ok(record) => record,
                Err(err) if err.is_timeout() => continue,
                Err(_) => return Err(self.closed(QueueRole::Input)),
            };
            self.tally.received += 1;
            StageCounters::add(&self.counters.received, 1);

            let mut outputs = Vec::new();
            self.transform
                .apply(&record, &mut outputs)
                .map_err(|source| StageError::Transform {
                    stage: self.stage.clone(),
                    transform: self.transform.name().to_string(),
                    source,
                })?;
            debug!(
                stage = %self.stage,
                produced = outputs.len(),
                "Transformed input #{}",
                self.tally.received
            );
            for output in &outputs {
                trace!(stage = %self.stage, ?output, "Produced output");
            }

            match self.deliver(outputs, token).await {
                Delivery::Complete => {}
                Delivery::Abandoned => break,
                Delivery::Closed => return Err(self.closed(QueueRole::Output)),
            }
        }
        Ok(())
    }

    /// Pushes every output in production order, retrying each on timeout.
    async fn deliver(&mut self, outputs: Vec<O>, token: &CancellationToken) -> Delivery {
        let mut pending = outputs.into_iter();

        while let Some(mut record) = pending.next() {
            let mut attempt: u64 = 0;
            loop {
                if token.is_cancelled() {
                    let dropped = 1 + pending.len() as u64;
                    self.tally.abandoned += dropped;
                    StageCounters::add(&self.counters.abandoned, dropped);
                    debug!(stage = %self.stage, dropped, "Abandoning undelivered outputs");
                    return Delivery::Abandoned;
                }

                attempt += 1;
                match self.output.push(record, self.timeout).await {
                    Ok(()) => {
                        self.tally.sent += 1;
                        StageCounters::add(&self.counters.sent, 1);
                        break;
                    }
                    Err(err) => {
                        let (item, reason) = err.into_parts();
                        if !reason.is_timeout() {
                            return Delivery::Closed;
                        }
                        record = item;
                        self.on_push_timeout(attempt).await;
                    }
                }
            }
        }
        Delivery::Complete
    }

    async fn on_push_timeout(&mut self, attempt: u64) {
        self.tally.push_timeouts += 1;
        StageCounters::add(&self.counters.push_timeouts, 1);

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(
            stage = %self.stage,
            queue = self.output.name(),
            timeout_ms,
            attempt,
            "push to output queue \"{}\" timed out after {} ms",
            self.output.name(),
            timeout_ms,
        );
        self.events
            .emit(
                events::PUSH_TIMEOUT,
                Some(serde_json::json!({
                    "stage": self.stage,
                    "queue": self.output.name(),
                    "timeout_ms": timeout_ms,
                    "attempt": attempt,
                })),
            )
            .await;
    }

    fn closed(&self, role: QueueRole) -> StageError {
        let queue = match role {
            QueueRole::Input => self.input.name(),
            QueueRole::Output => self.output.name(),
        };
        StageError::QueueClosed {
            stage: self.stage.clone(),
            role,
            queue: queue.to_string(),
        }
    }
}
