//! Batching
//!
//! Inside a batch, signal writes still invalidate immediately (reads see
//! fresh values) but effects are only queued. The queue is flushed once,
//! when the outermost batch closes, so an effect depending on several
//! signals written in the same batch runs once and never sees a mix of old
//! and new values.

use tracing::{trace, warn};

use super::runtime::ReactiveGraph;
use crate::error::Result;

/// An open batch. Closing the outermost one flushes pending effects.
///
/// Prefer [`ReactiveGraph::batch`]; the guard exists for callers whose
/// writes do not fit in a closure. Dropping it without [`commit`] closes
/// the batch and flushes too, but an effect error can then only be logged;
/// during a panic the batch is closed without flushing.
///
/// [`commit`]: BatchGuard::commit
#[must_use = "the batch closes as soon as the guard is dropped"]
pub struct BatchGuard<'g> {
    graph: &'g ReactiveGraph,
    depth: usize,
    open: bool,
}

impl<'g> BatchGuard<'g> {
    /// Nesting depth of this batch, starting at 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Close the batch, flushing if it was the outermost one.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        if self.graph.close_batch() {
            trace!(graph = ?self.graph.id(), "outermost batch closed");
            self.graph.flush()?;
        }
        Ok(())
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.open || !self.graph.close_batch() || std::thread::panicking() {
            return;
        }
        trace!(graph = ?self.graph.id(), "outermost batch dropped");
        if let Err(err) = self.graph.flush() {
            warn!(error = %err, "effect failed while flushing a dropped batch");
        }
    }
}

impl ReactiveGraph {
    /// Open a batch explicitly.
    pub fn begin_batch(&self) -> BatchGuard<'_> {
        let depth = self.open_batch();
        BatchGuard {
            graph: self,
            depth,
            open: true,
        }
    }

    /// Run `f` with effects deferred until it returns.
    ///
    /// Batches nest; only the outermost one flushes. The returned error is
    /// the first error raised by an effect during that flush.
    ///
    /// ```rust
    /// use watchgraph_core::reactive::ReactiveGraph;
    ///
    /// let graph = ReactiveGraph::new();
    /// let first = graph.create_signal("Ada");
    /// let last = graph.create_signal("Lovelace");
    ///
    /// graph
    ///     .batch(|g| {
    ///         first.set(g, "Grace")?;
    ///         last.set(g, "Hopper")
    ///     })
    ///     .unwrap()
    ///     .unwrap();
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce(&ReactiveGraph) -> R) -> Result<R> {
        let guard = self.begin_batch();
        let out = f(self);
        guard.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Result;
    use crate::reactive::ReactiveGraph;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn many_writes_one_run() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        graph
            .create_effect(move |g| {
                source.get(g);
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        graph
            .batch(|g| -> Result<()> {
                for value in 1..=5 {
                    source.set(g, value)?;
                }
                Ok(())
            })
            .unwrap()
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(source.get(&graph), 5);
    }

    #[test]
    fn effects_never_see_half_applied_batches() {
        let graph = ReactiveGraph::new();
        let a = graph.create_signal(1);
        let b = graph.create_signal(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        graph
            .create_effect(move |g| {
                seen_clone.lock().push((a.get(g), b.get(g)));
                Ok(())
            })
            .unwrap();

        graph
            .batch(|g| -> Result<()> {
                a.set(g, 2)?;
                b.set(g, 2)
            })
            .unwrap()
            .unwrap();

        assert_eq!(*seen.lock(), vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn reads_inside_a_batch_are_fresh() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(1);
        let doubled = graph.create_memo(move |g| Ok(source.get(g) * 2));

        let inside = graph
            .batch(|g| -> Result<i32> {
                source.set(g, 21)?;
                doubled.get(g)
            })
            .unwrap()
            .unwrap();
        assert_eq!(inside, 42);
    }

    #[test]
    fn only_the_outermost_batch_flushes() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        graph
            .create_effect(move |g| {
                source.get(g);
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let outer = graph.begin_batch();
        assert_eq!(outer.depth(), 1);
        source.set(&graph, 1).unwrap();

        let inner = graph.begin_batch();
        assert_eq!(inner.depth(), 2);
        source.set(&graph, 2).unwrap();
        inner.commit().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(graph.pending_effect_count(), 1);

        outer.commit().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!graph.is_batching());
    }

    #[test]
    fn equal_writes_in_a_batch_schedule_nothing() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(7);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        graph
            .create_effect(move |g| {
                source.get(g);
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        graph.batch(|g| source.set(g, 7)).unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_guard_still_flushes() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        graph
            .create_effect(move |g| {
                source.get(g);
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        {
            let _batch = graph.begin_batch();
            source.set(&graph, 1).unwrap();
            source.set(&graph, 2).unwrap();
            assert_eq!(runs.load(Ordering::SeqCst), 1);
        }
        assert!(!graph.is_batching());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(graph.pending_effect_count(), 0);
    }

    #[test]
    fn dropped_inner_guard_leaves_the_flush_to_the_outer_one() {
        let graph = ReactiveGraph::new();
        let source = graph.create_signal(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        graph
            .create_effect(move |g| {
                source.get(g);
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let outer = graph.begin_batch();
        {
            let _inner = graph.begin_batch();
            source.set(&graph, 1).unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        outer.commit().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
