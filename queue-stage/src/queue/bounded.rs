//! Capacity-bounded in-process queue.

use super::{InputQueue, OutputQueue};
use crate::errors::{PushError, QueueError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Mutex;

/// A named, capacity-bounded queue backed by a tokio channel.
///
/// The same value serves as both the input and the output endpoint.
pub struct BoundedQueue<T> {
    name: String,
    capacity: usize,
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T: Send> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` records.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            capacity,
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Returns the maximum number of buffered records.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of records currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops every record currently buffered without waiting.
    pub async fn drain(&self) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Send + 'static> InputQueue<T> for BoundedQueue<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pop(&self, timeout: Duration) -> Result<T, QueueError> {
        let recv = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        match tokio::time::timeout(timeout, recv).await {
            Ok(Some(item)) => Ok(item),
            // Unreachable while the queue owns its sender.
            Ok(None) => Err(QueueError::closed(&self.name)),
            Err(_) => Err(QueueError::timeout(&self.name, timeout)),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> OutputQueue<T> for BoundedQueue<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        match self.tx.send_timeout(item, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(item)) => {
                Err(PushError::new(item, QueueError::timeout(&self.name, timeout)))
            }
            Err(SendTimeoutError::Closed(item)) => {
                Err(PushError::new(item, QueueError::closed(&self.name)))
            }
        }
    }
}
