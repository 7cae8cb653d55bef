//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos and
//! effects. It owns every node, records dependencies and schedules updates
//! when signals change.
//!
//! # How It Works
//!
//! 1. Creating a signal, memo or effect allocates a node in the graph's
//!    arena. Handles are plain indices; values live here.
//!
//! 2. When a memo or effect runs, the runtime pushes a tracking frame and
//!    every read lands in it. The frame becomes the node's new source list.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct dependents `Dirty` and everything downstream `MaybeDirty`
//!    b. Queues every reached effect
//!    c. Flushes the queue, unless a batch is open
//!
//! 4. Memos are lazy: they recompute on the next read, and only if one of
//!    their sources' versions actually moved.
//!
//! # Locking
//!
//! All state sits behind one `parking_lot::Mutex`. The lock is never held
//! while user code runs, so memos, effects and subscribers may freely read
//! and write the graph they belong to. A graph is meant to be driven from
//! one thread at a time.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::context::{Frame, FrameKind, TrackingStack};
use super::effect::Effect;
use super::memo::Memo;
use super::signal::Signal;
use super::subscriber::{Subscriber, SubscriberId, Subscribers};
use crate::config::{GraphConfig, PropagationMode};
use crate::error::{Error, NotFound, Result, SideEffect};
use crate::graph::{DirtyState, Node, NodeId, NodeKind, SourceRef, Sources, UpdateScheduler};

pub(crate) type AnyValue = Box<dyn Any + Send + Sync>;
type EqFn = Arc<dyn Fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool + Send + Sync>;
type ComputeFn = Arc<dyn Fn(&ReactiveGraph) -> Result<AnyValue> + Send + Sync>;
type EffectFn = Arc<dyn Fn(&ReactiveGraph) -> Result<()> + Send + Sync>;

/// Identifies the graph a handle was created by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-node payload, stored next to the topology in the arena.
enum Slot {
    Signal {
        value: AnyValue,
        equals: EqFn,
    },
    Memo {
        value: Option<AnyValue>,
        equals: EqFn,
        compute: ComputeFn,
    },
    Effect {
        /// `None` once disposed, which also drops whatever the body captured.
        body: Option<EffectFn>,
        run_count: usize,
        subscribers: Subscribers<usize>,
    },
}

struct GraphState {
    config: GraphConfig,
    scheduler: UpdateScheduler,
    /// Indexed by `NodeId`, parallel to the scheduler's arena.
    slots: Vec<Slot>,
    tracking: TrackingStack,
    batch_depth: usize,
    /// Ordered by `NodeId`, i.e. by registration order.
    pending_effects: BTreeSet<NodeId>,
    /// Memos to refresh at the end of the flush (eager mode only).
    stale_memos: IndexSet<NodeId>,
    flushing: bool,
}

struct Shared {
    id: GraphId,
    state: Mutex<GraphState>,
}

/// Owns every signal, memo and effect created through it.
///
/// Cloning is cheap and yields another handle to the same graph, which is
/// how timer callbacks and async collaborators get hold of it.
#[derive(Clone)]
pub struct ReactiveGraph {
    shared: Arc<Shared>,
}

impl ReactiveGraph {
    /// Create a graph with the default (lazy) configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        let id = GraphId::next();
        debug!(graph = ?id, mode = ?config.mode, "reactive graph created");
        Self {
            shared: Arc::new(Shared {
                id,
                state: Mutex::new(GraphState {
                    config,
                    scheduler: UpdateScheduler::new(),
                    slots: Vec::new(),
                    tracking: TrackingStack::new(),
                    batch_depth: 0,
                    pending_effects: BTreeSet::new(),
                    stale_memos: IndexSet::new(),
                    flushing: false,
                }),
            }),
        }
    }

    pub fn id(&self) -> GraphId {
        self.shared.id
    }

    pub fn config(&self) -> GraphConfig {
        self.lock().config.clone()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.shared.state.lock()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a signal that skips writes equal (`PartialEq`) to its value.
    pub fn create_signal<T>(&self, initial: T) -> Signal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.create_signal_with_eq(initial, |old: &T, new: &T| old == new)
    }

    /// Create a signal with a custom equality.
    ///
    /// Writes for which `eq(current, new)` holds are dropped without
    /// propagating. Pass `|_, _| false` to notify on every write, or compare
    /// `Arc`s with `Arc::ptr_eq` for identity semantics.
    pub fn create_signal_with_eq<T, F>(&self, initial: T, eq: F) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let equals: EqFn = Arc::new(
            move |old: &(dyn Any + Send + Sync), new: &(dyn Any + Send + Sync)| {
                match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                    (Some(old), Some(new)) => eq(old, new),
                    _ => false,
                }
            },
        );

        let mut state = self.lock();
        let id = state.scheduler.add_node(NodeKind::Source);
        state.slots.push(Slot::Signal {
            value: Box::new(initial),
            equals,
        });
        trace!(signal = %id, "signal created");

        Signal::from_parts(self.id(), id)
    }

    /// Register a memo. Nothing is computed until the first read.
    pub fn create_memo<T, F>(&self, compute: F) -> Memo<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&ReactiveGraph) -> Result<T> + Send + Sync + 'static,
    {
        let compute: ComputeFn = Arc::new(move |graph: &ReactiveGraph| {
            compute(graph).map(|value| Box::new(value) as AnyValue)
        });
        let equals: EqFn = Arc::new(
            |old: &(dyn Any + Send + Sync), new: &(dyn Any + Send + Sync)| {
                match (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                    (Some(old), Some(new)) => old == new,
                    _ => false,
                }
            },
        );

        let mut state = self.lock();
        let id = state.scheduler.add_node(NodeKind::Derived);
        state.slots.push(Slot::Memo {
            value: None,
            equals,
            compute,
        });
        trace!(memo = %id, "memo created");

        Memo::from_parts(self.id(), id)
    }

    /// Register an effect and run it once to collect its dependencies.
    ///
    /// If that first run fails, the effect is disposed and the error is
    /// returned.
    ///
    /// Writes made by the first run are flushed before this returns. If an
    /// effect run by that flush fails, its error is returned instead, and
    /// the new effect stays registered: it ran fine, and it keeps reacting
    /// until [`ReactiveGraph::dispose_all`].
    pub fn create_effect<F>(&self, body: F) -> Result<Effect>
    where
        F: Fn(&ReactiveGraph) -> Result<()> + Send + Sync + 'static,
    {
        let id = {
            let mut state = self.lock();
            let id = state.scheduler.add_node(NodeKind::Effect);
            state.slots.push(Slot::Effect {
                body: Some(Arc::new(body)),
                run_count: 0,
                subscribers: Subscribers::new(),
            });
            id
        };
        trace!(effect = %id, "effect created");

        let batch = self.begin_batch();
        let first_run = self.run_effect(id);
        if first_run.is_err() {
            // Released before the flush so it is not run again
            self.release_effect(id);
        }
        let flushed = batch.commit();

        match (first_run, flushed) {
            (Ok(()), Ok(())) => Ok(Effect::from_parts(self.id(), id)),
            (Err(err), flushed) => {
                if let Err(flush_err) = flushed {
                    warn!(error = %flush_err, "flush after failed effect creation also failed");
                }
                Err(err)
            }
            (Ok(()), Err(err)) => {
                warn!(effect = %id, error = %err, "another effect failed in the flush after creation");
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads and writes (used by the handles)
    // ------------------------------------------------------------------

    pub(crate) fn check_owner(&self, owner: GraphId, node: NodeId) -> Result<()> {
        if owner != self.shared.id || node.index() >= self.lock().slots.len() {
            return Err(Error::ForeignNode { node });
        }
        Ok(())
    }

    /// Clone the current value of a signal or memo, tracking the read if a
    /// computation is running.
    pub(crate) fn read_value<T>(&self, owner: GraphId, id: NodeId, track: bool) -> Result<T>
    where
        T: Clone + 'static,
    {
        self.check_owner(owner, id)?;

        let mut state = self.lock();
        let state = &mut *state;
        if track {
            let version = state.scheduler.get_node(id).map_or(0, Node::version);
            state.tracking.track(id, version);
        }

        let value = match &state.slots[id.index()] {
            Slot::Signal { value, .. } => (**value).downcast_ref::<T>(),
            Slot::Memo { value, .. } => value.as_ref().and_then(|value| (**value).downcast_ref::<T>()),
            Slot::Effect { .. } => None,
        };
        value.cloned().ok_or(Error::ForeignNode { node: id })
    }

    pub(crate) fn read_memo<T>(&self, owner: GraphId, id: NodeId, track: bool) -> Result<T>
    where
        T: Clone + 'static,
    {
        self.check_owner(owner, id)?;
        self.update_memo(id)?;
        self.read_value(owner, id, track)
    }

    pub(crate) fn write_signal<T>(&self, owner: GraphId, id: NodeId, value: T) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.check_owner(owner, id)?;

        let should_flush = {
            let mut state = self.lock();
            let state = &mut *state;

            if let Some(memo) = state.tracking.evaluating_memo() {
                warn!(memo = %memo, signal = %id, "rejected signal write during memo evaluation");
                return Err(Error::IllegalSideEffect(SideEffect::SignalWriteInMemo {
                    memo,
                    signal: id,
                }));
            }

            let Slot::Signal { value: current, equals } = &mut state.slots[id.index()] else {
                return Err(Error::ForeignNode { node: id });
            };
            let incoming: &(dyn Any + Send + Sync) = &value;
            if equals(&**current, incoming) {
                trace!(signal = %id, "write skipped: value unchanged");
                return Ok(());
            }
            *current = Box::new(value);

            let version = state
                .scheduler
                .get_node_mut(id)
                .map_or(0, Node::bump_version);
            let invalidation = state.scheduler.mark_changed(id);
            debug!(
                signal = %id,
                version,
                memos = invalidation.memos.len(),
                effects = invalidation.effects.len(),
                "signal changed"
            );

            state.pending_effects.extend(invalidation.effects);
            if state.config.mode == PropagationMode::Eager {
                state.stale_memos.extend(invalidation.memos);
            }
            state.batch_depth == 0 && !state.flushing
        };

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn with_node<R>(
        &self,
        owner: GraphId,
        id: NodeId,
        f: impl FnOnce(&Node) -> R,
    ) -> Result<R> {
        self.check_owner(owner, id)?;
        let state = self.lock();
        state
            .scheduler
            .get_node(id)
            .map(f)
            .ok_or(Error::ForeignNode { node: id })
    }

    pub(crate) fn memo_has_value(&self, owner: GraphId, id: NodeId) -> Result<bool> {
        self.check_owner(owner, id)?;
        Ok(matches!(
            self.lock().slots[id.index()],
            Slot::Memo { value: Some(_), .. }
        ))
    }

    pub(crate) fn effect_run_count(&self, owner: GraphId, id: NodeId) -> Result<usize> {
        self.check_owner(owner, id)?;
        match &self.lock().slots[id.index()] {
            Slot::Effect { run_count, .. } => Ok(*run_count),
            _ => Err(Error::ForeignNode { node: id }),
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Bring a memo up to date, recomputing it only if needed.
    fn update_memo(&self, id: NodeId) -> Result<()> {
        let maybe_sources = {
            let mut state = self.lock();
            let state = &mut *state;
            let has_value = matches!(state.slots[id.index()], Slot::Memo { value: Some(_), .. });
            let Some(node) = state.scheduler.get_node_mut(id) else {
                return Ok(());
            };

            if node.is_evaluating() {
                warn!(memo = %id, "cyclic dependency detected");
                state.tracking.fail_all(id);
                return Err(Error::CyclicDependency { node: id });
            }

            match (node.dirty_state(), has_value) {
                (DirtyState::Clean, true) => return Ok(()),
                (DirtyState::MaybeDirty, true) => {
                    // Guard the source walk too, a dynamic edge may close a cycle
                    node.set_evaluating(true);
                    Some(node.sources().clone())
                }
                _ => None,
            }
        };

        let needs_recompute = match maybe_sources {
            None => true,
            Some(sources) => {
                let changed = self.sources_changed(id, &sources);
                self.set_evaluating(id, false);
                changed?
            }
        };

        if needs_recompute {
            self.recompute_memo(id)
        } else {
            Ok(())
        }
    }

    /// Refresh every memo in `sources` and report whether any version moved.
    ///
    /// Marks `owner` clean when nothing changed.
    fn sources_changed(&self, owner: NodeId, sources: &[SourceRef]) -> Result<bool> {
        for source in sources {
            let kind = self.lock().scheduler.get_node(source.node).map(Node::kind);
            if kind == Some(NodeKind::Derived) {
                self.update_memo(source.node)?;
            }

            let current = self.lock().scheduler.get_node(source.node).map(Node::version);
            if current != Some(source.version) {
                return Ok(true);
            }
        }

        if let Some(node) = self.lock().scheduler.get_node_mut(owner) {
            node.mark_clean();
        }
        Ok(false)
    }

    fn recompute_memo(&self, id: NodeId) -> Result<()> {
        let compute = match &self.lock().slots[id.index()] {
            Slot::Memo { compute, .. } => Arc::clone(compute),
            _ => return Ok(()),
        };

        let frame = FrameGuard::enter(self, Some(id), FrameKind::Memo);
        let result = compute(self);
        let frame = frame.exit();

        let value = match (result, frame.cycle) {
            // Keep the last consistent value and stay dirty
            (_, Some(node)) => return Err(Error::CyclicDependency { node }),
            (Err(err), None) => return Err(err),
            (Ok(value), None) => value,
        };

        let mut state = self.lock();
        let state = &mut *state;
        let Slot::Memo {
            value: cached,
            equals,
            ..
        } = &mut state.slots[id.index()]
        else {
            return Ok(());
        };

        let changed = cached
            .as_ref()
            .map_or(true, |old| !equals(&**old, &*value));
        if changed {
            *cached = Some(value);
        }

        state.scheduler.replace_sources(id, frame.sources);
        if let Some(node) = state.scheduler.get_node_mut(id) {
            node.mark_clean();
            if changed {
                node.bump_version();
            }
        }
        trace!(memo = %id, changed, "memo recomputed");
        Ok(())
    }

    /// Decide whether a queued effect really has to run.
    fn effect_needs_run(&self, id: NodeId) -> Result<bool> {
        let sources = {
            let state = self.lock();
            let Some(node) = state.scheduler.get_node(id) else {
                return Ok(false);
            };
            if node.is_disposed() {
                return Ok(false);
            }
            match node.dirty_state() {
                DirtyState::Clean => return Ok(false),
                DirtyState::Dirty => return Ok(true),
                DirtyState::MaybeDirty => node.sources().clone(),
            }
        };
        self.sources_changed(id, &sources)
    }

    fn run_effect(&self, id: NodeId) -> Result<()> {
        let body = {
            let mut state = self.lock();
            let state = &mut *state;
            let Some(node) = state.scheduler.get_node(id) else {
                return Ok(());
            };
            if node.is_disposed() {
                return Ok(());
            }
            if node.is_evaluating() {
                // Never inline an effect into itself
                trace!(effect = %id, "re-entrant trigger deferred");
                state.pending_effects.insert(id);
                return Ok(());
            }
            match &state.slots[id.index()] {
                Slot::Effect { body: Some(body), .. } => Arc::clone(body),
                _ => return Ok(()),
            }
        };

        let frame = FrameGuard::enter(self, Some(id), FrameKind::Effect);
        let result = body(self);
        let frame = frame.exit();

        let (run_count, subscribers) = {
            let mut state = self.lock();
            let state = &mut *state;

            let disposed = state.scheduler.get_node(id).map_or(true, Node::is_disposed);
            if !disposed {
                // Edges are only installed now, so a write the body made to
                // something it had already read was not seen by propagation
                let stale = frame.sources.iter().any(|source| {
                    state.scheduler.get_node(source.node).is_some_and(|node| {
                        node.version() != source.version
                            || (node.kind() == NodeKind::Derived && !node.is_clean())
                    })
                });
                state.scheduler.replace_sources(id, frame.sources);
                if let Some(node) = state.scheduler.get_node_mut(id) {
                    node.mark_clean();
                    if stale {
                        node.mark_maybe_dirty();
                        state.pending_effects.insert(id);
                    }
                }
            }

            match &mut state.slots[id.index()] {
                Slot::Effect {
                    run_count,
                    subscribers,
                    ..
                } => {
                    *run_count += 1;
                    (*run_count, subscribers.snapshot())
                }
                _ => (0, Vec::new()),
            }
        };
        trace!(effect = %id, run_count, "effect ran");

        for subscriber in subscribers {
            subscriber.notify(run_count);
        }

        match frame.cycle {
            Some(node) => Err(Error::CyclicDependency { node }),
            None => result,
        }
    }

    fn set_evaluating(&self, id: NodeId, evaluating: bool) {
        if let Some(node) = self.lock().scheduler.get_node_mut(id) {
            node.set_evaluating(evaluating);
        }
    }

    // ------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------

    /// Run every queued effect.
    ///
    /// Called automatically after an un-batched write and when the outermost
    /// batch closes. Effects run lowest registration first; effects queued
    /// by writes made during the flush join it. The first error is returned
    /// after the queue has drained.
    pub fn flush(&self) -> Result<()> {
        let limit = {
            let mut state = self.lock();
            if state.flushing || state.batch_depth > 0 {
                return Ok(());
            }
            state.flushing = true;
            state.config.max_effect_runs_per_flush
        };
        let _flushing = FlushGuard { graph: self };

        let mut runs = 0;
        let mut first_error = None;

        loop {
            let stale = {
                let mut state = self.lock();
                let memos: Vec<NodeId> = state.stale_memos.drain(..).collect();
                state.scheduler.topological_sort(memos)
            };
            for memo in stale {
                if let Err(err) = self.update_memo(memo) {
                    first_error.get_or_insert(err);
                }
            }

            let Some(effect) = self.lock().pending_effects.pop_first() else {
                break;
            };

            match self.effect_needs_run(effect) {
                Ok(true) => {
                    runs += 1;
                    if runs > limit {
                        let dropped = {
                            let mut state = self.lock();
                            let dropped = state.pending_effects.len();
                            state.pending_effects.clear();
                            dropped
                        };
                        warn!(limit, dropped, "effect flush exceeded its run limit");
                        return Err(Error::RunawayEffects { runs: limit });
                    }
                    if let Err(err) = self.run_effect(effect) {
                        first_error.get_or_insert(err);
                    }
                }
                Ok(false) => trace!(effect = %effect, "effect skipped: sources unchanged"),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(runs, "flush complete");
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn open_batch(&self) -> usize {
        let mut state = self.lock();
        state.batch_depth += 1;
        state.batch_depth
    }

    /// Returns `true` when the outermost batch was closed.
    pub(crate) fn close_batch(&self) -> bool {
        let mut state = self.lock();
        state.batch_depth = state.batch_depth.saturating_sub(1);
        state.batch_depth == 0
    }

    /// Whether a batch is currently open.
    pub fn is_batching(&self) -> bool {
        self.lock().batch_depth > 0
    }

    /// Whether reads are currently being recorded as dependencies.
    pub fn is_tracking(&self) -> bool {
        self.lock().tracking.is_active()
    }

    /// The memo or effect currently running, if any.
    pub fn current_observer(&self) -> Option<NodeId> {
        self.lock().tracking.current_owner()
    }

    /// Run `f` without recording any of its reads as dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce(&ReactiveGraph) -> R) -> R {
        let frame = FrameGuard::enter(self, None, FrameKind::Untracked);
        let out = f(self);
        frame.exit();
        out
    }

    // ------------------------------------------------------------------
    // Effects and subscriptions
    // ------------------------------------------------------------------

    /// Stop an effect for good. `NotFound` if it was already disposed.
    pub(crate) fn dispose_effect(&self, owner: GraphId, id: NodeId) -> Result<()> {
        self.check_owner(owner, id)?;
        if self.release_effect(id) {
            Ok(())
        } else {
            Err(Error::NotFound(NotFound::Effect(id)))
        }
    }

    /// Returns `false` if `id` is not a live effect.
    fn release_effect(&self, id: NodeId) -> bool {
        let mut state = self.lock();
        let state = &mut *state;

        let Some(node) = state.scheduler.get_node_mut(id) else {
            return false;
        };
        if node.kind() != NodeKind::Effect || node.is_disposed() {
            return false;
        }
        node.mark_disposed();

        state.scheduler.clear_sources(id);
        state.pending_effects.remove(&id);
        if let Slot::Effect { body, subscribers, .. } = &mut state.slots[id.index()] {
            *body = None;
            subscribers.clear();
        }
        debug!(effect = %id, "effect disposed");
        true
    }

    /// Call `callback` with the run count after every run of `effect`.
    pub fn on_effect_run<F>(&self, effect: &Effect, callback: F) -> Result<SubscriberId>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let id = effect.id();
        self.check_owner(effect.graph_id(), id)?;

        let mut state = self.lock();
        let state = &mut *state;
        let live = state
            .scheduler
            .get_node(id)
            .is_some_and(|node| !node.is_disposed());
        match &mut state.slots[id.index()] {
            Slot::Effect { subscribers, .. } if live => Ok(subscribers.add(Subscriber::new(callback))),
            _ => Err(Error::NotFound(NotFound::Effect(id))),
        }
    }

    pub fn unsubscribe_effect(&self, effect: &Effect, subscriber: SubscriberId) -> Result<()> {
        let id = effect.id();
        self.check_owner(effect.graph_id(), id)?;

        match &mut self.lock().slots[id.index()] {
            Slot::Effect { subscribers, .. } => subscribers.remove(subscriber),
            _ => Err(Error::NotFound(NotFound::Effect(id))),
        }
    }

    /// Tear the graph down: dispose every live effect.
    ///
    /// Returns how many effects were disposed.
    pub fn dispose_all(&self) -> usize {
        let live: Vec<NodeId> = self
            .lock()
            .scheduler
            .nodes()
            .filter(|node| node.kind() == NodeKind::Effect && !node.is_disposed())
            .map(Node::id)
            .collect();

        let disposed = live.into_iter().filter(|&id| self.release_effect(id)).count();
        debug!(graph = ?self.id(), disposed, "graph torn down");
        disposed
    }

    /// Number of nodes (signals, memos and effects) ever created.
    pub fn node_count(&self) -> usize {
        self.lock().scheduler.node_count()
    }

    /// Number of effects waiting for the next flush.
    pub fn pending_effect_count(&self) -> usize {
        self.lock().pending_effects.len()
    }
}

impl Default for ReactiveGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ReactiveGraph")
            .field("id", &self.shared.id)
            .field("nodes", &state.scheduler.node_count())
            .field("batch_depth", &state.batch_depth)
            .field("tracking_depth", &state.tracking.depth())
            .field("pending_effects", &state.pending_effects.len())
            .finish()
    }
}

/// Keeps a tracking frame on the stack for the duration of a computation.
///
/// Dropping without `exit` (a panicking computation) still pops the frame
/// and clears the owner's recursion guard.
struct FrameGuard<'g> {
    graph: &'g ReactiveGraph,
    owner: Option<NodeId>,
    depth: usize,
    exited: bool,
}

impl<'g> FrameGuard<'g> {
    fn enter(graph: &'g ReactiveGraph, owner: Option<NodeId>, kind: FrameKind) -> Self {
        let mut state = graph.lock();
        if let Some(node) = owner.and_then(|id| state.scheduler.get_node_mut(id)) {
            node.set_evaluating(true);
        }
        let depth = state.tracking.enter(owner, kind);
        Self {
            graph,
            owner,
            depth,
            exited: false,
        }
    }

    fn exit(mut self) -> Frame {
        self.exited = true;
        self.pop()
    }

    fn pop(&self) -> Frame {
        let mut state = self.graph.lock();
        if let Some(node) = self.owner.and_then(|id| state.scheduler.get_node_mut(id)) {
            node.set_evaluating(false);
        }
        state.tracking.exit(self.depth).unwrap_or(Frame {
            owner: self.owner,
            kind: FrameKind::Untracked,
            sources: Sources::new(),
            cycle: None,
        })
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.exited {
            self.pop();
        }
    }
}

/// Clears the flushing flag however the flush ends.
struct FlushGuard<'g> {
    graph: &'g ReactiveGraph,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.graph.lock().flushing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (count.clone(), count)
    }

    #[test]
    fn handles_are_bound_to_their_graph() {
        let graph = ReactiveGraph::new();
        let other = ReactiveGraph::new();
        let signal = graph.create_signal(1);

        assert_eq!(signal.get(&graph), 1);
        let err = signal.set(&other, 2).unwrap_err();
        assert!(matches!(err, Error::ForeignNode { node } if node == signal.id()));
        assert!(signal.try_get(&other).is_err());
    }

    #[test]
    fn unbatched_write_runs_effects_before_returning() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let (runs, runs_clone) = counter();

        graph
            .create_effect(move |g| {
                source.get(g);
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(&graph, 1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(graph.pending_effect_count(), 0);
    }

    #[test]
    fn memo_equality_cuts_off_downstream_effects() {
        let graph = ReactiveGraph::new();
        let number = graph.create_signal(2);
        let parity = graph.create_memo(move |g| Ok(number.get(g) % 2));
        let (runs, runs_clone) = counter();

        graph
            .create_effect(move |g| {
                parity.get(g)?;
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        // Parity unchanged: the effect is checked but not re-run
        number.set(&graph, 4).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        number.set(&graph, 5).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn eager_mode_refreshes_memos_during_flush() {
        let graph = ReactiveGraph::with_config(GraphConfig {
            mode: PropagationMode::Eager,
            ..GraphConfig::default()
        });
        let source = graph.create_signal(1);
        let doubled = graph.create_memo(move |g| Ok(source.get(g) * 2));
        let quadrupled = graph.create_memo(move |g| Ok(doubled.get(g)? * 2));

        assert_eq!(quadrupled.get(&graph).unwrap(), 4);

        source.set(&graph, 3).unwrap();
        // Recomputed by the flush, not by this read
        assert!(!doubled.is_stale(&graph).unwrap());
        assert!(!quadrupled.is_stale(&graph).unwrap());
        assert_eq!(quadrupled.get(&graph).unwrap(), 12);
    }

    #[test]
    fn lazy_mode_leaves_memos_stale_until_read() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(1);
        let doubled = graph.create_memo(move |g| Ok(source.get(g) * 2));

        assert_eq!(doubled.get(&graph).unwrap(), 2);
        source.set(&graph, 5).unwrap();
        assert!(doubled.is_stale(&graph).unwrap());
        assert_eq!(doubled.get(&graph).unwrap(), 10);
        assert!(!doubled.is_stale(&graph).unwrap());
    }

    #[test]
    fn runaway_effects_are_stopped() {
        let graph = ReactiveGraph::with_config(GraphConfig {
            max_effect_runs_per_flush: 20,
            ..GraphConfig::default()
        });
        let ticks = graph.create_signal(0u32);

        // Creation itself triggers the loop once its first run is flushed
        let err = graph
            .create_effect(move |g| {
                let next = ticks.get(g) + 1;
                ticks.set(g, next)
            })
            .unwrap_err();
        assert!(matches!(err, Error::RunawayEffects { runs: 20 }));
        assert_eq!(graph.pending_effect_count(), 0);
    }

    #[test]
    fn effect_writing_its_own_source_reruns_once_more() {
        let graph = ReactiveGraph::new();
        let value = graph.create_signal(0u32);
        let (runs, runs_clone) = counter();

        // Clamps the value to at most 10
        graph
            .create_effect(move |g| {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                if value.get(g) > 10 {
                    value.set(g, 10)?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        value.set(&graph, 50).unwrap();
        assert_eq!(value.get(&graph), 10);
        // Once for 50, once more to observe the clamped 10
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dispose_all_tears_down_every_effect() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let (runs, runs_clone) = counter();

        for _ in 0..3 {
            let runs = runs_clone.clone();
            graph
                .create_effect(move |g| {
                    source.get(g);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        assert_eq!(graph.dispose_all(), 3);
        assert_eq!(graph.dispose_all(), 0);

        source.set(&graph, 1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(source.subscriber_count(&graph), 0);
    }

    #[test]
    fn untracked_reads_create_no_edges() {
        let graph = ReactiveGraph::new();
        let tracked = graph.create_signal(1);
        let ignored = graph.create_signal(1);
        let sum = graph.create_memo(move |g| {
            let extra = g.untracked(|g| ignored.get(g));
            Ok(tracked.get(g) + extra)
        });

        assert_eq!(sum.get(&graph).unwrap(), 2);
        assert_eq!(sum.dependency_count(&graph).unwrap(), 1);

        ignored.set(&graph, 10).unwrap();
        assert!(!sum.is_stale(&graph).unwrap());
        assert_eq!(sum.get(&graph).unwrap(), 2);
    }

    #[test]
    fn observer_is_visible_while_running() {
        let graph = ReactiveGraph::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        assert!(!graph.is_tracking());
        let effect = graph
            .create_effect(move |g| {
                let inside = (g.current_observer(), g.is_tracking());
                let untracked = g.untracked(|g| g.is_tracking());
                seen_clone.lock().push((inside, untracked));
                Ok(())
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![((Some(effect.id()), true), false)]);
        assert_eq!(graph.current_observer(), None);
    }

    #[test]
    fn graph_debug_reports_counts() {
        let graph = ReactiveGraph::new();
        graph.create_signal(0);
        let rendered = format!("{graph:?}");
        assert!(rendered.contains("nodes: 1"));
    }
}
