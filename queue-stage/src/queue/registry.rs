//! Name-based queue resolution.

use super::{BoundedQueue, InputQueue, OutputQueue};
use crate::errors::QueueError;
use dashmap::DashMap;
use std::any::{type_name, Any};
use std::sync::Arc;

type Endpoint = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Endpoints {
    input: Option<Endpoint>,
    output: Option<Endpoint>,
}

/// Registry mapping queue names to typed endpoints.
///
/// Stages resolve their queues here at configure time. Endpoints are stored
/// type-erased; resolving a name with the wrong record type is an error.
#[derive(Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Endpoints>,
}

impl QueueRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [`BoundedQueue`] and registers it as both endpoints under
    /// its name.
    pub fn create_bounded<T>(&self, name: impl Into<String>, capacity: usize) -> Arc<BoundedQueue<T>>
    where
        T: Send + 'static,
    {
        let name = name.into();
        let queue = Arc::new(BoundedQueue::new(name.clone(), capacity));
        self.register_input::<T>(name.clone(), queue.clone());
        self.register_output::<T>(name, queue.clone());
        queue
    }

    /// Registers an input endpoint, replacing any previous one.
    pub fn register_input<T>(&self, name: impl Into<String>, queue: Arc<dyn InputQueue<T>>)
    where
        T: Send + 'static,
    {
        let endpoint: Endpoint = Arc::new(queue);
        self.queues.entry(name.into()).or_default().input = Some(endpoint);
    }

    /// Registers an output endpoint, replacing any previous one.
    pub fn register_output<T>(&self, name: impl Into<String>, queue: Arc<dyn OutputQueue<T>>)
    where
        T: Send + 'static,
    {
        let endpoint: Endpoint = Arc::new(queue);
        self.queues.entry(name.into()).or_default().output = Some(endpoint);
    }

    /// Resolves the input endpoint registered under `name`.
    pub fn input<T>(&self, name: &str) -> Result<Arc<dyn InputQueue<T>>, QueueError>
    where
        T: Send + 'static,
    {
        let entry = self.queues.get(name).ok_or_else(|| QueueError::not_found(name))?;
        let endpoint = entry.input.as_ref().ok_or_else(|| QueueError::not_found(name))?;
        endpoint
            .downcast_ref::<Arc<dyn InputQueue<T>>>()
            .cloned()
            .ok_or_else(|| QueueError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Resolves the output endpoint registered under `name`.
    pub fn output<T>(&self, name: &str) -> Result<Arc<dyn OutputQueue<T>>, QueueError>
    where
        T: Send + 'static,
    {
        let entry = self.queues.get(name).ok_or_else(|| QueueError::not_found(name))?;
        let endpoint = entry.output.as_ref().ok_or_else(|| QueueError::not_found(name))?;
        endpoint
            .downcast_ref::<Arc<dyn OutputQueue<T>>>()
            .cloned()
            .ok_or_else(|| QueueError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Removes every endpoint registered under `name`.
    pub fn remove(&self, name: &str) -> bool {
        self.queues.remove(name).is_some()
    }

    /// Returns true if any endpoint is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Returns the registered queue names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.names())
            .finish()
    }
}
