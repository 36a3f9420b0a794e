//! Scripted queue endpoints.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::{PushError, QueueError};
use crate::queue::{InputQueue, OutputQueue};

/// An input queue that serves a fixed script of records.
///
/// Once the script is exhausted every pop waits out its timeout and fails
/// with [`QueueError::Timeout`], unless the queue was closed.
#[derive(Debug)]
pub struct ScriptedInput<T> {
    name: String,
    records: Mutex<VecDeque<T>>,
    pops: AtomicUsize,
    closed: AtomicBool,
}

impl<T> ScriptedInput<T> {
    /// Creates an input serving `records` in order.
    pub fn new(name: impl Into<String>, records: Vec<T>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(records.into()),
            pops: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends a record to the script.
    pub fn feed(&self, record: T) {
        self.records.lock().push_back(record);
    }

    /// Makes pops on an empty script fail with [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns how many records have not been popped yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns how many pops were attempted.
    #[must_use]
    pub fn pop_attempts(&self) -> usize {
        self.pops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Send + 'static> InputQueue<T> for ScriptedInput<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pop(&self, timeout: Duration) -> Result<T, QueueError> {
        self.pops.fetch_add(1, Ordering::SeqCst);
        let next = self.records.lock().pop_front();
        if let Some(record) = next {
            return Ok(record);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::closed(&self.name));
        }
        tokio::time::sleep(timeout).await;
        Err(QueueError::timeout(&self.name, timeout))
    }
}

/// An output queue whose every push times out.
#[derive(Debug)]
pub struct TimeoutOutput<T> {
    name: String,
    attempts: AtomicUsize,
    _records: std::marker::PhantomData<fn(T)>,
}

impl<T> TimeoutOutput<T> {
    /// Creates a permanently backpressured output.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attempts: AtomicUsize::new(0),
            _records: std::marker::PhantomData,
        }
    }

    /// Returns how many pushes were attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Send + 'static> OutputQueue<T> for TimeoutOutput<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(timeout).await;
        Err(PushError::new(item, QueueError::timeout(&self.name, timeout)))
    }
}

/// An output queue that records delivered items, optionally timing out on
/// the first few attempts.
#[derive(Debug)]
pub struct RecordingOutput<T> {
    name: String,
    delivered: Mutex<Vec<T>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    closed: AtomicBool,
}

impl<T> RecordingOutput<T> {
    /// Creates an output that accepts every push.
    pub fn new(name: impl Into<String>) -> Self {
        Self::failing_first(name, 0)
    }

    /// Creates an output whose first `failures` pushes time out.
    pub fn failing_first(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            delivered: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent push fail with [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns how many pushes were attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the delivered records in arrival order.
    #[must_use]
    pub fn delivered(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl<T: Send + 'static> OutputQueue<T> for RecordingOutput<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(PushError::new(item, QueueError::closed(&self.name)));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            tokio::time::sleep(timeout).await;
            return Err(PushError::new(item, QueueError::timeout(&self.name, timeout)));
        }
        self.delivered.lock().push(item);
        Ok(())
    }
}
