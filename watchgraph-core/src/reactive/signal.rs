//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: a single mutable value
//! owned by a [`ReactiveGraph`].
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a memo or effect is running, the running
//!    computation is recorded as a dependent.
//!
//! 2. When a write changes the value (under the signal's equality), the
//!    version is bumped and every dependent is invalidated.
//!
//! 3. Outside a batch, the write flushes the effect queue before returning.
//!
//! # Memory Layout
//!
//! The handle is two integers: the owning graph's id and the node index.
//! It is `Copy` and can be moved into any number of closures; the value
//! itself lives in the graph.

use std::fmt;
use std::marker::PhantomData;

use super::runtime::{GraphId, ReactiveGraph};
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// A reactive signal holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use watchgraph_core::reactive::ReactiveGraph;
///
/// let graph = ReactiveGraph::new();
/// let count = graph.create_signal(0);
///
/// count.set(&graph, 5).unwrap();
/// count.update(&graph, |value| value + 1).unwrap();
/// assert_eq!(count.get(&graph), 6);
/// ```
pub struct Signal<T> {
    graph: GraphId,
    id: NodeId,
    marker: PhantomData<fn() -> T>,
}

impl<T> Signal<T> {
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

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal in `graph`. Same as [`ReactiveGraph::create_signal`].
    pub fn new(graph: &ReactiveGraph, value: T) -> Self
    where
        T: PartialEq,
    {
        graph.create_signal(value)
    }

    /// Get the current value, tracking the read if a computation is running.
    ///
    /// # Panics
    ///
    /// Panics if the signal belongs to a different graph. Use
    /// [`Signal::try_get`] to handle that case.
    pub fn get(&self, graph: &ReactiveGraph) -> T {
        self.try_get(graph).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_get(&self, graph: &ReactiveGraph) -> Result<T> {
        graph.read_value(self.graph, self.id, true)
    }

    /// Apply `f` to the current value. Tracked like [`Signal::get`].
    pub fn with<R>(&self, graph: &ReactiveGraph, f: impl FnOnce(&T) -> R) -> R {
        f(&self.get(graph))
    }

    /// Get the current value without establishing a dependency.
    ///
    /// # Panics
    ///
    /// Panics if the signal belongs to a different graph.
    pub fn get_untracked(&self, graph: &ReactiveGraph) -> T {
        graph
            .read_value(self.graph, self.id, false)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Set a new value and propagate it.
    ///
    /// A value equal to the current one is dropped without any propagation.
    /// Errors raised by effects during the resulting flush are returned here.
    pub fn set(&self, graph: &ReactiveGraph, value: T) -> Result<()> {
        graph.write_signal(self.graph, self.id, value)
    }

    /// Shorthand for `set(f(&current))`. The read is not tracked.
    pub fn update<F>(&self, graph: &ReactiveGraph, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let current: T = graph.read_value(self.graph, self.id, false)?;
        self.set(graph, f(&current))
    }

    /// Number of observable changes so far.
    pub fn version(&self, graph: &ReactiveGraph) -> Result<u64> {
        graph.with_node(self.graph, self.id, Node::version)
    }

    /// Number of memos and effects currently depending on this signal.
    pub fn subscriber_count(&self, graph: &ReactiveGraph) -> usize {
        graph
            .with_node(self.graph, self.id, |node| node.dependents().len())
            .unwrap_or(0)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

impl<T> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.graph == other.graph && self.id == other.id
    }
}

impl<T> Eq for Signal<T> {}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("graph", &self.graph)
            .field("id", &self.id)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
