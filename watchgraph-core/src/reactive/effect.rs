//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued. The queue is
//!    flushed after the write (or when the outermost batch closes), in
//!    registration order, after upstream memos have settled.
//!
//! 3. Every run records a fresh set of dependencies.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos must be pure; effects exist for their side effects and may write
//!   to signals. Such writes are queued, never run inline.
//!
//! # Disposal
//!
//! A disposed effect loses all of its edges and never runs again, even if
//! it was already queued for the flush in progress.

use std::fmt;

use super::runtime::{GraphId, ReactiveGraph};
use super::subscriber::SubscriberId;
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// Handle to an effect registered in a [`ReactiveGraph`].
///
/// # Example
///
/// ```rust
/// use watchgraph_core::reactive::ReactiveGraph;
///
/// let graph = ReactiveGraph::new();
/// let count = graph.create_signal(0);
///
/// let effect = graph
///     .create_effect(move |g| {
///         tracing::info!(count = count.get(g), "count changed");
///         Ok(())
///     })
///     .unwrap();
///
/// count.set(&graph, 5).unwrap();
/// assert_eq!(effect.run_count(&graph).unwrap(), 2);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    graph: GraphId,
    id: NodeId,
}

impl Effect {
    pub(crate) fn from_parts(graph: GraphId, id: NodeId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again. Fails with
    /// `NotFound` if it was already disposed.
    pub fn dispose(&self, graph: &ReactiveGraph) -> Result<()> {
        graph.dispose_effect(self.graph, self.id)
    }

    pub fn is_disposed(&self, graph: &ReactiveGraph) -> Result<bool> {
        graph.with_node(self.graph, self.id, Node::is_disposed)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self, graph: &ReactiveGraph) -> Result<usize> {
        graph.effect_run_count(self.graph, self.id)
    }

    /// Get the number of dependencies recorded by the last run.
    pub fn dependency_count(&self, graph: &ReactiveGraph) -> Result<usize> {
        graph.with_node(self.graph, self.id, |node| node.sources().len())
    }

    /// Call `callback` with the run count after every run.
    pub fn subscribe<F>(&self, graph: &ReactiveGraph, callback: F) -> Result<SubscriberId>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        graph.on_effect_run(self, callback)
    }

    pub fn unsubscribe(&self, graph: &ReactiveGraph, subscriber: SubscriberId) -> Result<()> {
        graph.unsubscribe_effect(self, subscriber)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("graph", &self.graph)
            .field("id", &self.id)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, NotFound};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn effect_runs_on_creation() {
        let graph = ReactiveGraph::new();
        let run_count = Arc::new(AtomicUsize::new(0));
        let run_count_clone = run_count.clone();

        let effect = graph
            .create_effect(move |_| {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(&graph).unwrap(), 1);
        assert_eq!(effect.dependency_count(&graph).unwrap(), 0);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let graph = ReactiveGraph::new();
        let name = graph.create_signal("ada".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let effect = graph
            .create_effect(move |g| {
                seen_clone.lock().push(name.get(g));
                Ok(())
            })
            .unwrap();

        name.set(&graph, "grace".to_string()).unwrap();
        name.set(&graph, "grace".to_string()).unwrap();

        assert_eq!(*seen.lock(), vec!["ada".to_string(), "grace".to_string()]);
        assert_eq!(effect.run_count(&graph).unwrap(), 2);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let run_count = Arc::new(AtomicUsize::new(0));
        let run_count_clone = run_count.clone();

        let effect = graph
            .create_effect(move |g| {
                source.get(g);
                run_count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        effect.dispose(&graph).unwrap();
        assert!(effect.is_disposed(&graph).unwrap());
        assert_eq!(source.subscriber_count(&graph), 0);

        for value in 1..=3 {
            source.set(&graph, value).unwrap();
        }
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        let err = effect.dispose(&graph).unwrap_err();
        assert!(matches!(err, Error::NotFound(NotFound::Effect(id)) if id == effect.id()));
    }

    #[test]
    fn effects_run_in_registration_order() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            graph
                .create_effect(move |g| {
                    if source.get(g) > 0 {
                        order.lock().push(name);
                    }
                    Ok(())
                })
                .unwrap();
        }

        source.set(&graph, 1).unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn subscribers_hear_every_run() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let effect = graph
            .create_effect(move |g| {
                source.get(g);
                Ok(())
            })
            .unwrap();

        let heard = Arc::new(Mutex::new(Vec::new()));
        let heard_clone = heard.clone();
        let subscriber = effect
            .subscribe(&graph, move |run| heard_clone.lock().push(run))
            .unwrap();

        source.set(&graph, 1).unwrap();
        source.set(&graph, 2).unwrap();
        effect.unsubscribe(&graph, subscriber).unwrap();
        source.set(&graph, 3).unwrap();

        assert_eq!(*heard.lock(), vec![2, 3]);
        assert!(effect.unsubscribe(&graph, subscriber).is_err());
    }

    #[test]
    fn disposing_another_effect_mid_flush_stops_it() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let victim_slot: Arc<Mutex<Option<Effect>>> = Arc::default();
        let victim_runs = Arc::new(AtomicUsize::new(0));

        let slot = victim_slot.clone();
        graph
            .create_effect(move |g| {
                if source.get(g) > 0 {
                    if let Some(victim) = *slot.lock() {
                        victim.dispose(g)?;
                    }
                }
                Ok(())
            })
            .unwrap();

        let runs = victim_runs.clone();
        let victim = graph
            .create_effect(move |g| {
                source.get(g);
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        *victim_slot.lock() = Some(victim);

        // Both are queued; the first one disposes the second before it runs
        source.set(&graph, 1).unwrap();
        assert_eq!(victim_runs.load(Ordering::SeqCst), 1);
        assert!(victim.is_disposed(&graph).unwrap());
    }

    #[test]
    fn failing_first_run_disposes_the_effect() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);

        let err = graph
            .create_effect(move |g| {
                source.get(g);
                Err(Error::DigestInProgress)
            })
            .unwrap_err();

        assert!(matches!(err, Error::DigestInProgress));
        assert_eq!(source.subscriber_count(&graph), 0);
    }

    #[test]
    fn another_effect_failing_keeps_the_new_effect_alive() {
        let graph = ReactiveGraph::new();
        let trigger = graph.create_signal(0);
        let other = graph.create_signal(0);

        graph
            .create_effect(move |g| {
                if trigger.get(g) != 0 {
                    return Err(Error::DigestInProgress);
                }
                Ok(())
            })
            .unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let err = graph
            .create_effect(move |g| {
                other.get(g);
                runs_clone.fetch_add(1, Ordering::SeqCst);
                trigger.set(g, 1)
            })
            .unwrap_err();

        // The error came from the first effect's run during the flush
        assert!(matches!(err, Error::DigestInProgress));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(other.subscriber_count(&graph), 1);

        other.set(&graph, 5).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn effect_errors_reach_the_writer() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);

        graph
            .create_effect(move |g| {
                if source.get(g) == 13 {
                    return Err(Error::DigestInProgress);
                }
                Ok(())
            })
            .unwrap();

        assert!(source.set(&graph, 13).is_err());
        // The effect stays subscribed and recovers on the next change
        assert!(source.set(&graph, 14).is_ok());
    }
}
