//! Watchers polled by the digest loop.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies a watcher registered with a
/// [`DirtyCheckScheduler`](super::DirtyCheckScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherHandle(u64);

impl WatcherHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

type CheckFn<T> = Arc<dyn Fn() -> T + Send + Sync>;
type ListenerFn<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// Type-erased view of a watcher, so the scheduler can hold watchers of
/// different value types in one list.
pub(crate) trait Watch: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate the check once. When the result differs from the last
    /// observed value, store it, call the listener with `(new, old)` and
    /// return `true`.
    fn poll(&self) -> bool;
}

pub(crate) struct Watcher<T> {
    name: String,
    check: CheckFn<T>,
    listener: Option<ListenerFn<T>>,
    last: Mutex<T>,
}

impl<T> Watcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Build a watcher, evaluating `check` once for the initial value.
    pub(crate) fn new(
        name: String,
        check: impl Fn() -> T + Send + Sync + 'static,
        listener: Option<ListenerFn<T>>,
    ) -> Self {
        let initial = check();
        Self {
            name,
            check: Arc::new(check),
            listener,
            last: Mutex::new(initial),
        }
    }
}

impl<T> Watch for Watcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&self) -> bool {
        let current = (self.check)();
        let previous = {
            let mut last = self.last.lock();
            if *last == current {
                return false;
            }
            std::mem::replace(&mut *last, current.clone())
        };

        // Lock released: the listener may poke at anything, this watcher included
        if let Some(listener) = &self.listener {
            listener(&current, &previous);
        }
        true
    }
}
