//! Strategy gate implementation.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;
use crate::reactive::{Subscriber, SubscriberId, Subscribers};

/// When a component behind a gate may be refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Checked on every detection cycle.
    #[default]
    Default,

    /// Checked only after a new input reference, an event, an async
    /// emission or an explicit [`StrategyGate::mark_for_check`].
    OnPush,
}

/// Why a gate became pending. Passed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    InputReplaced,
    Event,
    AsyncEmission,
    Manual,
}

struct GateState<T> {
    policy: Policy,
    input: Arc<T>,
    pending: bool,
    disposed: bool,
    subscribers: Subscribers<RefreshReason>,
}

/// Wraps a component input with a refresh policy.
///
/// Cloning yields another handle to the same gate.
///
/// ```rust
/// use std::sync::Arc;
/// use watchgraph_core::strategy::{Policy, StrategyGate};
///
/// let first = Arc::new(String::from("ada"));
/// let gate = StrategyGate::wrap(first.clone(), Policy::OnPush);
///
/// // Same reference: nothing to do
/// gate.notify_input_replaced(first);
/// assert!(!gate.consume_refresh());
///
/// gate.notify_input_replaced(Arc::new(String::from("grace")));
/// assert!(gate.consume_refresh());
/// assert!(!gate.consume_refresh());
/// ```
pub struct StrategyGate<T> {
    state: Arc<Mutex<GateState<T>>>,
}

impl<T> StrategyGate<T>
where
    T: Send + Sync + 'static,
{
    pub fn wrap(initial: Arc<T>, policy: Policy) -> Self {
        trace!(?policy, "strategy gate created");
        Self {
            state: Arc::new(Mutex::new(GateState {
                policy,
                input: initial,
                pending: false,
                disposed: false,
                subscribers: Subscribers::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock()
    }

    /// The parent handed the component a (possibly) new input.
    ///
    /// Under `OnPush` only a different reference marks the gate; the stored
    /// input is replaced either way, also on a disposed gate. Returns whether
    /// the gate was marked.
    pub fn notify_input_replaced(&self, input: Arc<T>) -> bool {
        let should_mark = {
            let mut state = self.lock();
            let replaced = !Arc::ptr_eq(&state.input, &input);
            state.input = input;
            if state.disposed {
                return false;
            }
            match state.policy {
                Policy::Default => true,
                Policy::OnPush => replaced,
            }
        };

        if should_mark {
            mark(&self.state, RefreshReason::InputReplaced);
        } else {
            trace!("input reference unchanged; refresh not requested");
        }
        should_mark
    }

    /// An event handler bound to the component ran.
    pub fn notify_event(&self) -> bool {
        mark(&self.state, RefreshReason::Event)
    }

    /// An async source the component subscribes to emitted.
    pub fn notify_async_emission(&self) -> bool {
        mark(&self.state, RefreshReason::AsyncEmission)
    }

    /// Explicitly request a check, e.g. after mutating the input in place.
    pub fn mark_for_check(&self) -> bool {
        mark(&self.state, RefreshReason::Manual)
    }

    /// Hand an async source a way to notify this gate.
    ///
    /// The binding does not keep the gate alive and goes quiet once the
    /// gate is disposed.
    pub fn bind_async(&self) -> AsyncBinding<T> {
        AsyncBinding {
            gate: Arc::downgrade(&self.state),
        }
    }

    /// Whether the component should be re-evaluated now.
    ///
    /// Under `OnPush` this returns the pending flag and clears it. Under
    /// `Default` it is always `true`. A disposed gate never refreshes.
    pub fn consume_refresh(&self) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }
        let pending = std::mem::take(&mut state.pending);
        match state.policy {
            Policy::Default => true,
            Policy::OnPush => pending,
        }
    }

    /// The input currently tracked.
    pub fn input(&self) -> Arc<T> {
        Arc::clone(&self.lock().input)
    }

    pub fn policy(&self) -> Policy {
        self.lock().policy
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    /// Tear the gate down: no further refreshes, subscribers dropped.
    pub fn dispose(&self) {
        let mut state = self.lock();
        state.disposed = true;
        state.pending = false;
        state.subscribers.clear();
        debug!(policy = ?state.policy, "strategy gate disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Call `callback` whenever the gate goes from clear to pending.
    ///
    /// Only explicit notifications set the pending flag. A `Default` gate
    /// refreshes on every [`consume_refresh`](Self::consume_refresh) without
    /// one, and its subscribers hear nothing about those refreshes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(RefreshReason) + Send + Sync + 'static,
    {
        self.lock().subscribers.add(Subscriber::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> Result<()> {
        self.lock().subscribers.remove(id)
    }
}

/// Set the pending flag; subscribers hear about the clear-to-set edge.
fn mark<T>(state: &Mutex<GateState<T>>, reason: RefreshReason) -> bool {
    let subscribers = {
        let mut state = state.lock();
        if state.disposed {
            return false;
        }
        let was_pending = std::mem::replace(&mut state.pending, true);
        trace!(?reason, was_pending, "strategy gate marked");
        if was_pending {
            return true;
        }
        state.subscribers.snapshot()
    };

    for subscriber in subscribers {
        subscriber.notify(reason);
    }
    true
}

impl<T> Clone for StrategyGate<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for StrategyGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StrategyGate")
            .field("policy", &state.policy)
            .field("pending", &state.pending)
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// Held by an async source (a stream, a timer) feeding a gated component.
pub struct AsyncBinding<T> {
    gate: Weak<Mutex<GateState<T>>>,
}

impl<T> AsyncBinding<T> {
    /// Report an emission. Returns `false` once the gate is gone or disposed.
    pub fn emit(&self) -> bool {
        match self.gate.upgrade() {
            Some(state) => mark(&state, RefreshReason::AsyncEmission),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        match self.gate.upgrade() {
            Some(state) => {
                let disposed = state.lock().disposed;
                !disposed
            }
            None => false,
        }
    }
}

impl<T> Clone for AsyncBinding<T> {
    fn clone(&self) -> Self {
        Self {
            gate: Weak::clone(&self.gate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        name: String,
    }

    fn user(name: &str) -> Arc<RwLock<User>> {
        Arc::new(RwLock::new(User {
            name: name.to_string(),
        }))
    }

    #[test]
    fn on_push_ignores_in_place_mutation() {
        let input = user("ada");
        let gate = StrategyGate::wrap(input.clone(), Policy::OnPush);

        input.write().name = "grace".to_string();
        gate.notify_input_replaced(input.clone());

        assert!(!gate.is_pending());
        assert!(!gate.consume_refresh());
        // The change is there, just not shown
        assert_eq!(gate.input().read().name, "grace");
    }

    #[test]
    fn on_push_refreshes_on_new_reference() {
        let gate = StrategyGate::wrap(user("ada"), Policy::OnPush);

        assert!(gate.notify_input_replaced(user("ada")));
        assert!(gate.is_pending());
        assert!(gate.consume_refresh());
        assert!(!gate.consume_refresh());
    }

    #[test]
    fn default_policy_always_refreshes() {
        let input = user("ada");
        let gate = StrategyGate::wrap(input.clone(), Policy::Default);

        input.write().name = "grace".to_string();
        assert!(gate.consume_refresh());
        assert!(gate.consume_refresh());
        assert!(gate.notify_input_replaced(input));
        assert!(gate.consume_refresh());
        assert!(!gate.is_pending());
    }

    #[test]
    fn events_and_manual_checks_mark_on_push_gates() {
        let gate = StrategyGate::wrap(Arc::new(0), Policy::OnPush);

        gate.notify_event();
        assert!(gate.consume_refresh());

        gate.mark_for_check();
        assert!(gate.consume_refresh());

        gate.notify_async_emission();
        assert!(gate.consume_refresh());
        assert!(!gate.consume_refresh());
    }

    #[test]
    fn subscribers_hear_the_clear_to_pending_edge_only() {
        let gate = StrategyGate::wrap(Arc::new(0), Policy::OnPush);
        let reasons = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let reasons_clone = reasons.clone();
        let id = gate.subscribe(move |reason| reasons_clone.lock().push(reason));

        gate.notify_event();
        gate.mark_for_check();
        assert!(gate.consume_refresh());
        gate.notify_input_replaced(Arc::new(1));

        assert_eq!(
            *reasons.lock(),
            vec![RefreshReason::Event, RefreshReason::InputReplaced]
        );

        gate.unsubscribe(id).unwrap();
        assert!(gate.unsubscribe(id).is_err());
    }

    #[test]
    fn subscribers_may_consume_from_the_callback() {
        let gate = StrategyGate::wrap(Arc::new(0), Policy::OnPush);
        let refreshed = Arc::new(AtomicUsize::new(0));

        let inner = gate.clone();
        let refreshed_clone = refreshed.clone();
        gate.subscribe(move |_| {
            if inner.consume_refresh() {
                refreshed_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        gate.notify_event();
        gate.notify_event();
        assert_eq!(refreshed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn async_bindings_go_quiet_after_dispose() {
        let gate = StrategyGate::wrap(Arc::new(0), Policy::OnPush);
        let binding = gate.bind_async();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        gate.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(binding.emit());
        assert!(gate.consume_refresh());

        gate.dispose();
        assert!(gate.is_disposed());
        assert!(!binding.is_active());
        assert!(!binding.emit());
        assert!(!gate.notify_event());
        assert!(!gate.consume_refresh());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposed_gate_still_tracks_the_input() {
        let gate = StrategyGate::wrap(user("ada"), Policy::OnPush);
        gate.dispose();

        let next = user("grace");
        assert!(!gate.notify_input_replaced(next.clone()));
        assert!(Arc::ptr_eq(&gate.input(), &next));
        assert!(!gate.is_pending());
        assert!(!gate.consume_refresh());
    }

    #[test]
    fn default_gate_subscribers_only_hear_notifications() {
        let gate = StrategyGate::wrap(Arc::new(0), Policy::Default);
        let reasons = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let reasons_clone = reasons.clone();
        gate.subscribe(move |reason| reasons_clone.lock().push(reason));

        assert!(gate.consume_refresh());
        assert!(gate.consume_refresh());
        assert!(reasons.lock().is_empty());

        gate.notify_event();
        gate.notify_event();
        assert!(gate.consume_refresh());
        gate.mark_for_check();

        assert_eq!(
            *reasons.lock(),
            vec![RefreshReason::Event, RefreshReason::Manual]
        );
    }

    #[test]
    fn bindings_do_not_keep_the_gate_alive() {
        let gate = StrategyGate::wrap(Arc::new(0), Policy::OnPush);
        let binding = gate.bind_async();
        drop(gate);
        assert!(!binding.emit());
    }

    #[test]
    fn policy_names_round_trip_through_serde() {
        let policy: Policy = serde_json::from_str("\"on_push\"").unwrap();
        assert_eq!(policy, Policy::OnPush);
        assert_eq!(serde_json::to_string(&Policy::Default).unwrap(), "\"default\"");
    }
}
