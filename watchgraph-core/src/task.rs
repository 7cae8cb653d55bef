//! Deferred work
//!
//! Timers and externally resolved futures that call back into the graph,
//! the digest scheduler or a strategy gate. Time is virtual: nothing fires
//! until the owner calls [`TaskQueue::advance`] or
//! [`TaskQueue::poll_resolved`], so every deferred mutation happens at a
//! well-defined point.
//!
//! ```rust
//! use watchgraph_core::reactive::ReactiveGraph;
//! use watchgraph_core::task::TaskQueue;
//!
//! let graph = ReactiveGraph::new();
//! let count = graph.create_signal(0);
//! let queue = TaskQueue::new();
//!
//! let g = graph.clone();
//! queue.schedule(1_000, move || count.set(&g, 1));
//!
//! queue.advance(999).unwrap();
//! assert_eq!(count.get(&graph), 0);
//! queue.advance(1).unwrap();
//! assert_eq!(count.get(&graph), 1);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, trace};

use crate::error::{Error, NotFound, Result};

/// Identifies a scheduled timer or a registered future callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

type Callback = Box<dyn FnOnce() -> Result<()> + Send>;

enum Resolution {
    Pending,
    Ready(Callback),
    Abandoned,
}

/// A receiver waiting for its sender, with the callback to run on arrival.
trait Awaiting: Send {
    fn try_resolve(&mut self) -> Resolution;
}

struct OnResolve<T, F> {
    receiver: oneshot::Receiver<T>,
    callback: Option<F>,
}

impl<T, F> Awaiting for OnResolve<T, F>
where
    T: Send + 'static,
    F: FnOnce(T) -> Result<()> + Send + 'static,
{
    fn try_resolve(&mut self) -> Resolution {
        match self.receiver.try_recv() {
            Ok(value) => match self.callback.take() {
                Some(callback) => Resolution::Ready(Box::new(move || callback(value))),
                None => Resolution::Abandoned,
            },
            Err(TryRecvError::Empty) => Resolution::Pending,
            Err(TryRecvError::Closed) => Resolution::Abandoned,
        }
    }
}

#[derive(Default)]
struct QueueState {
    now: u64,
    next_id: u64,
    /// Keyed by due time, then by id so equal due times keep schedule order.
    timers: BTreeMap<(u64, TaskId), Callback>,
    futures: IndexMap<TaskId, Box<dyn Awaiting>>,
}

impl QueueState {
    fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Timers on a virtual clock plus callbacks for oneshot futures.
///
/// Cloning yields another handle to the same queue, so callbacks can
/// schedule follow-up work.
#[derive(Clone, Default)]
pub struct TaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.lock().now
    }

    /// Number of timers and futures that have not fired yet.
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.timers.len() + state.futures.len()
    }

    /// Due time of the earliest timer, if any.
    pub fn next_due(&self) -> Option<u64> {
        self.lock().timers.keys().next().map(|(due, _)| *due)
    }

    /// Run `callback` once, `delay_ms` after the current virtual time.
    pub fn schedule<F>(&self, delay_ms: u64, callback: F) -> TaskId
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let mut state = self.lock();
        let id = state.next_id();
        let due = state.now.saturating_add(delay_ms);
        state.timers.insert((due, id), Box::new(callback));
        trace!(task = %id, due, "timer scheduled");
        id
    }

    /// Run `callback` with the value once the matching sender delivers it.
    ///
    /// If the sender is dropped without sending, the callback is discarded.
    pub fn on_resolve<T, F>(&self, receiver: oneshot::Receiver<T>, callback: F) -> TaskId
    where
        T: Send + 'static,
        F: FnOnce(T) -> Result<()> + Send + 'static,
    {
        let mut state = self.lock();
        let id = state.next_id();
        state.futures.insert(
            id,
            Box::new(OnResolve {
                receiver,
                callback: Some(callback),
            }),
        );
        trace!(task = %id, "future registered");
        id
    }

    /// Drop a timer or future callback. `NotFound` if it already fired or
    /// was cancelled.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        let mut state = self.lock();
        let key = state.timers.keys().find(|(_, task)| *task == id).copied();
        let removed = match key {
            Some(key) => state.timers.remove(&key).is_some(),
            None => state.futures.shift_remove(&id).is_some(),
        };
        if !removed {
            return Err(Error::NotFound(NotFound::Task(id)));
        }
        trace!(task = %id, "task cancelled");
        Ok(())
    }

    /// Move the clock forward by `ms`, firing every timer that comes due,
    /// in due order.
    ///
    /// Timers scheduled by callbacks fire in the same call if they come due
    /// before the new time. The first callback error stops the advance with
    /// the clock left at that timer's due time.
    pub fn advance(&self, ms: u64) -> Result<usize> {
        let target = self.now().saturating_add(ms);
        let mut fired = 0;

        loop {
            let callback = {
                let mut state = self.lock();
                match state.timers.first_key_value() {
                    Some(((due, _), _)) if *due <= target => {}
                    _ => break,
                }
                let Some(((due, id), callback)) = state.timers.pop_first() else {
                    break;
                };
                state.now = due;
                trace!(task = %id, due, "timer fired");
                callback
            };
            callback()?;
            fired += 1;
        }

        self.lock().now = target;
        debug!(now = target, fired, "clock advanced");
        Ok(fired)
    }

    /// Run the callbacks of every future resolved so far.
    pub fn poll_resolved(&self) -> Result<usize> {
        let ids: Vec<TaskId> = self.lock().futures.keys().copied().collect();
        let mut fired = 0;

        for id in ids {
            let resolution = {
                let mut state = self.lock();
                let Some(future) = state.futures.get_mut(&id) else {
                    continue;
                };
                let resolution = future.try_resolve();
                if !matches!(resolution, Resolution::Pending) {
                    state.futures.shift_remove(&id);
                }
                resolution
            };

            match resolution {
                Resolution::Ready(callback) => {
                    trace!(task = %id, "future resolved");
                    callback()?;
                    fired += 1;
                }
                Resolution::Abandoned => trace!(task = %id, "future abandoned by its sender"),
                Resolution::Pending => {}
            }
        }
        Ok(fired)
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TaskQueue")
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .field("futures", &state.futures.len())
            .finish()
    }
}
