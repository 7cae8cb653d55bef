//! Subscriber types for the reactive system.
//!
//! A Subscriber is an external callback (usually a renderer) that wants to
//! hear about something happening inside the core: an effect re-running or
//! a strategy gate asking for a refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, NotFound, Result};

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber callback receiving an argument of type `A`.
pub struct Subscriber<A> {
    id: SubscriberId,
    notify: Arc<dyn Fn(A) + Send + Sync>,
}

impl<A> Subscriber<A> {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Arc::new(notify),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn notify(&self, arg: A) {
        (self.notify)(arg);
    }
}

impl<A> Clone for Subscriber<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<A> std::fmt::Debug for Subscriber<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// Subscribers in registration order.
///
/// Callers snapshot the list under their lock and notify after releasing
/// it, so callbacks are free to call back into the core.
#[derive(Debug)]
pub struct Subscribers<A> {
    entries: Vec<Subscriber<A>>,
}

impl<A> Default for Subscribers<A> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<A> Subscribers<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subscriber: Subscriber<A>) -> SubscriberId {
        let id = subscriber.id();
        self.entries.push(subscriber);
        id
    }

    /// Remove a subscriber; `NotFound` if it is not registered.
    pub fn remove(&mut self, id: SubscriberId) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id() != id);
        if self.entries.len() == before {
            return Err(Error::NotFound(NotFound::Subscriber(id)));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Subscriber<A>> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
