//! Dirty-check scheduler
//!
//! Polls every registered watcher, pass after pass, until a pass finds
//! nothing dirty or the pass limit is reached.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::watcher::{Watch, Watcher, WatcherHandle};
use crate::config::{DigestConfig, SideEffectPolicy};
use crate::error::{Error, NotFound, Result, SideEffect};

/// Outcome of one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestResult {
    /// Passes run, including the final clean one when converged.
    pub passes: usize,
    pub converged: bool,
    /// Names of every watcher found dirty, in first-dirty order.
    pub dirty: Vec<String>,
    /// Names of the watchers found dirty by the last dirty pass.
    pub last_pass_dirty: Vec<String>,
    /// Watcher additions and removals deferred by the snapshot policy.
    pub deferred_mutations: usize,
}

impl DigestResult {
    /// Turn a non-converged digest into [`Error::DigestNotConverged`].
    pub fn into_result(self) -> Result<DigestResult> {
        if self.converged {
            Ok(self)
        } else {
            Err(Error::DigestNotConverged {
                passes: self.passes,
            })
        }
    }
}

enum Deferred {
    Add(WatcherHandle, Arc<dyn Watch>),
    Remove(WatcherHandle),
}

struct DigestState {
    config: DigestConfig,
    next_handle: u64,
    watchers: IndexMap<WatcherHandle, Arc<dyn Watch>>,
    running: bool,
    /// First side effect rejected during the running digest.
    violation: Option<SideEffect>,
    deferred: Vec<Deferred>,
    deferred_total: usize,
}

impl DigestState {
    fn next_handle(&mut self) -> WatcherHandle {
        let handle = WatcherHandle::new(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn apply_deferred(&mut self) {
        for mutation in self.deferred.drain(..) {
            match mutation {
                Deferred::Add(handle, watcher) => {
                    self.watchers.insert(handle, watcher);
                }
                Deferred::Remove(handle) => {
                    self.watchers.shift_remove(&handle);
                }
            }
        }
    }

    /// Whether `handle` is registered once pending mutations apply.
    fn will_contain(&self, handle: WatcherHandle) -> bool {
        let mut present = self.watchers.contains_key(&handle);
        for mutation in &self.deferred {
            match mutation {
                Deferred::Add(added, _) if *added == handle => present = true,
                Deferred::Remove(removed) if *removed == handle => present = false,
                _ => {}
            }
        }
        present
    }
}

/// A legacy digest-cycle scheduler.
///
/// The handle is cheap to clone; clones share the same watcher set, which
/// is how check functions and listeners reach back into the scheduler.
///
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use watchgraph_core::digest::DirtyCheckScheduler;
///
/// let scheduler = DirtyCheckScheduler::new();
/// let clicks = Arc::new(AtomicU32::new(0));
///
/// let read = clicks.clone();
/// scheduler.add_watcher("clicks", move || read.load(Ordering::SeqCst)).unwrap();
///
/// clicks.store(1, Ordering::SeqCst);
/// let result = scheduler.digest().unwrap();
/// assert!(result.converged);
/// assert_eq!(result.passes, 2);
/// assert_eq!(result.dirty, vec!["clicks".to_string()]);
/// ```
#[derive(Clone)]
pub struct DirtyCheckScheduler {
    state: Arc<Mutex<DigestState>>,
}

impl DirtyCheckScheduler {
    pub fn new() -> Self {
        Self::with_config(DigestConfig::default())
    }

    pub fn with_config(config: DigestConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DigestState {
                config,
                next_handle: 0,
                watchers: IndexMap::new(),
                running: false,
                violation: None,
                deferred: Vec::new(),
                deferred_total: 0,
            })),
        }
    }

    pub fn config(&self) -> DigestConfig {
        self.lock().config.clone()
    }

    fn lock(&self) -> MutexGuard<'_, DigestState> {
        self.state.lock()
    }

    /// Register a watcher. `check` is evaluated once right away to seed
    /// its last-observed value.
    pub fn add_watcher<T, F>(&self, name: impl Into<String>, check: F) -> Result<WatcherHandle>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.register(name.into(), check, None)
    }

    /// Register a watcher whose `listener` receives `(new, old)` every
    /// time a digest finds it dirty.
    pub fn add_watcher_with_listener<T, F, L>(
        &self,
        name: impl Into<String>,
        check: F,
        listener: L,
    ) -> Result<WatcherHandle>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        L: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.register(name.into(), check, Some(Arc::new(listener)))
    }

    fn register<T, F>(
        &self,
        name: String,
        check: F,
        listener: Option<Arc<dyn Fn(&T, &T) + Send + Sync>>,
    ) -> Result<WatcherHandle>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.reject_if_running(|| SideEffect::WatcherAdded { name: name.clone() })?;

        // Seeding runs user code, so it happens outside the lock
        let watcher: Arc<dyn Watch> = Arc::new(Watcher::new(name.clone(), check, listener));

        let mut state = self.lock();
        let handle = state.next_handle();
        if state.running {
            state.deferred.push(Deferred::Add(handle, watcher));
            state.deferred_total += 1;
            debug!(watcher = %handle, name = %name, "watcher registration deferred");
        } else {
            state.watchers.insert(handle, watcher);
            trace!(watcher = %handle, name = %name, "watcher added");
        }
        Ok(handle)
    }

    /// Unregister a watcher. `NotFound` if it is not registered.
    pub fn remove_watcher(&self, handle: WatcherHandle) -> Result<()> {
        self.reject_if_running(|| SideEffect::WatcherRemoved { watcher: handle })?;

        let mut state = self.lock();
        if !state.will_contain(handle) {
            return Err(Error::NotFound(NotFound::Watcher(handle)));
        }
        if state.running {
            state.deferred.push(Deferred::Remove(handle));
            state.deferred_total += 1;
            debug!(watcher = %handle, "watcher removal deferred");
        } else {
            state.watchers.shift_remove(&handle);
            trace!(watcher = %handle, "watcher removed");
        }
        Ok(())
    }

    /// Under the reject policy, fail (and poison the running digest) when
    /// a digest is in flight.
    fn reject_if_running(&self, describe: impl FnOnce() -> SideEffect) -> Result<()> {
        let mut state = self.lock();
        if !state.running || state.config.side_effects != SideEffectPolicy::Reject {
            return Ok(());
        }
        let side_effect = describe();
        warn!(side_effect = %side_effect, "rejected watcher mutation during digest");
        state.violation.get_or_insert_with(|| side_effect.clone());
        Err(Error::IllegalSideEffect(side_effect))
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    pub fn contains(&self, handle: WatcherHandle) -> bool {
        self.lock().watchers.contains_key(&handle)
    }

    /// Whether a digest is currently running.
    pub fn is_digesting(&self) -> bool {
        self.lock().running
    }

    /// Run a digest with the configured pass limit.
    pub fn digest(&self) -> Result<DigestResult> {
        let max_passes = self.lock().config.max_passes;
        self.run_digest(max_passes)
    }

    /// Poll every watcher until a pass finds nothing dirty, or until
    /// `max_passes` dirty passes have run.
    ///
    /// Each pass polls watchers in registration order. Hitting the limit is
    /// reported through [`DigestResult::converged`], not as an error.
    pub fn run_digest(&self, max_passes: usize) -> Result<DigestResult> {
        if max_passes == 0 {
            return Err(Error::InvalidPassLimit);
        }
        {
            let mut state = self.lock();
            if state.running {
                return Err(Error::DigestInProgress);
            }
            state.running = true;
            state.violation = None;
            state.deferred_total = 0;
        }
        let _running = RunningGuard { scheduler: self };

        let mut dirty: IndexSet<String> = IndexSet::new();
        let mut last_pass_dirty = Vec::new();
        let mut passes = 0;
        let mut converged = false;

        while passes < max_passes {
            passes += 1;
            let snapshot: Vec<(WatcherHandle, Arc<dyn Watch>)> = {
                let mut state = self.lock();
                state.apply_deferred();
                state
                    .watchers
                    .iter()
                    .map(|(handle, watcher)| (*handle, Arc::clone(watcher)))
                    .collect()
            };

            let mut pass_dirty = Vec::new();
            for (handle, watcher) in snapshot {
                let changed = watcher.poll();
                let violation = self.lock().violation.take();
                if let Some(side_effect) = violation {
                    return Err(Error::IllegalSideEffect(side_effect));
                }
                if changed {
                    trace!(watcher = %handle, name = watcher.name(), pass = passes, "watcher dirty");
                    pass_dirty.push(watcher.name().to_string());
                }
            }

            if pass_dirty.is_empty() {
                converged = true;
                break;
            }
            dirty.extend(pass_dirty.iter().cloned());
            last_pass_dirty = pass_dirty;
        }

        let deferred_mutations = self.lock().deferred_total;
        let result = DigestResult {
            passes,
            converged,
            dirty: dirty.into_iter().collect(),
            last_pass_dirty,
            deferred_mutations,
        };

        if converged {
            debug!(passes, dirty = result.dirty.len(), "digest converged");
        } else {
            warn!(
                passes,
                still_dirty = ?result.last_pass_dirty,
                "digest hit its pass limit without converging"
            );
        }
        Ok(result)
    }
}

impl Default for DirtyCheckScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DirtyCheckScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DirtyCheckScheduler")
            .field("watchers", &state.watchers.len())
            .field("running", &state.running)
            .field("config", &state.config)
            .finish()
    }
}

/// Ends the digest however it exits; mutations still deferred are applied.
struct RunningGuard<'s> {
    scheduler: &'s DirtyCheckScheduler,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.scheduler.lock();
        state.running = false;
        state.violation = None;
        state.apply_deferred();
    }
}
