//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a direct dependency changes, the memo is marked `Dirty`; when
//!    something further upstream changes it is marked `MaybeDirty`.
//!
//! 4. On next access a `MaybeDirty` memo first brings its sources up to
//!    date and compares their versions with the ones it saw last time.
//!
//! 5. If a source version moved, recompute. Otherwise, mark clean and
//!    return the cache.
//!
//! A recomputation that yields a value equal to the cached one does not
//! bump the memo's version, so its own dependents stay untouched.
//!
//! # Purity
//!
//! Computations must be free of side effects. Writing to a signal while a
//! memo is computing fails with [`Error::IllegalSideEffect`], and a memo
//! that ends up reading itself fails with [`Error::CyclicDependency`].
//!
//! [`Error::IllegalSideEffect`]: crate::Error::IllegalSideEffect
//! [`Error::CyclicDependency`]: crate::Error::CyclicDependency

use std::fmt;
use std::marker::PhantomData;

use super::runtime::{GraphId, ReactiveGraph};
use crate::error::Result;
use crate::graph::{DirtyState, Node, NodeId};

/// A cached derived value that recomputes only when dependencies change.
///
/// ```rust
/// use watchgraph_core::reactive::ReactiveGraph;
///
/// let graph = ReactiveGraph::new();
/// let count = graph.create_signal(2);
/// let doubled = graph.create_memo(move |g| Ok(count.get(g) * 2));
///
/// assert_eq!(doubled.get(&graph).unwrap(), 4);
/// count.set(&graph, 5).unwrap();
/// assert_eq!(doubled.get(&graph).unwrap(), 10);
/// ```
pub struct Memo<T> {
    graph: GraphId,
    id: NodeId,
    marker: PhantomData<fn() -> T>,
}

impl<T> Memo<T> {
    pub(crate) fn from_parts(graph: GraphId, id: NodeId) -> Self {
        Self {
            graph,
            id,
            marker: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph
    }
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the current value, recomputing if necessary.
    ///
    /// Tracked like a signal read when a computation is running.
    pub fn get(&self, graph: &ReactiveGraph) -> Result<T> {
        graph.read_memo(self.graph, self.id, true)
    }

    /// Like [`Memo::get`], without establishing a dependency.
    pub fn get_untracked(&self, graph: &ReactiveGraph) -> Result<T> {
        graph.read_memo(self.graph, self.id, false)
    }

    /// Current dirty state.
    pub fn state(&self, graph: &ReactiveGraph) -> Result<DirtyState> {
        graph.with_node(self.graph, self.id, Node::dirty_state)
    }

    /// Whether the next read may recompute.
    pub fn is_stale(&self, graph: &ReactiveGraph) -> Result<bool> {
        graph.with_node(self.graph, self.id, |node| !node.is_clean())
    }

    /// Number of times the cached value actually changed.
    pub fn version(&self, graph: &ReactiveGraph) -> Result<u64> {
        graph.with_node(self.graph, self.id, Node::version)
    }

    pub fn has_value(&self, graph: &ReactiveGraph) -> Result<bool> {
        graph.memo_has_value(self.graph, self.id)
    }

    /// Number of sources read during the last evaluation.
    pub fn dependency_count(&self, graph: &ReactiveGraph) -> Result<usize> {
        graph.with_node(self.graph, self.id, |node| node.sources().len())
    }

    /// Number of memos and effects reading this memo.
    pub fn dependent_count(&self, graph: &ReactiveGraph) -> Result<usize> {
        graph.with_node(self.graph, self.id, |node| node.dependents().len())
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Memo<T> {}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("graph", &self.graph)
            .field("id", &self.id)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
