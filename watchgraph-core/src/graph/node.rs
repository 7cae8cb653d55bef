//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Nodes only carry topology and bookkeeping; the values they compute live
//! in the reactive runtime that owns the graph.

use std::fmt;

use indexmap::IndexSet;
use smallvec::SmallVec;

/// Identifier for a node in the dependency graph.
///
/// Nodes live in an append-only arena, so the index doubles as the node's
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Build an id from an arena index.
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("dependency graph exceeded u32::MAX nodes"))
    }

    /// Arena index of this node.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A signal. Roots of the graph: dependents only, no dependencies.
    Source,

    /// A memo. Has dependencies and may have dependents.
    Derived,

    /// An effect. Leaves of the graph: dependencies only.
    Effect,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// Something upstream changed, but not a direct dependency. The node
    /// has to check its sources before deciding to recompute.
    MaybeDirty,

    /// A direct dependency changed.
    Dirty,
}

/// A dependency edge as seen from the dependent: which node was read and
/// the version it had at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRef {
    pub node: NodeId,
    pub version: u64,
}

/// Ordered list of sources, in the order they were first read.
pub type Sources = SmallVec<[SourceRef; 4]>;

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Bumped every time the node's observable value changes.
    version: u64,

    /// Nodes this node read during its last evaluation.
    sources: Sources,

    /// Nodes that read this node, in subscription order.
    dependents: IndexSet<NodeId>,

    /// Set while the node is being evaluated; doubles as the recursion guard.
    evaluating: bool,

    disposed: bool,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                // Start dirty to force the first evaluation
                NodeKind::Derived | NodeKind::Effect => DirtyState::Dirty,
            },
            version: 0,
            sources: Sources::new(),
            dependents: IndexSet::new(),
            evaluating: false,
            disposed: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty. Never downgrades `Dirty`.
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record an observable change and return the new version.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub(crate) fn set_sources(&mut self, sources: Sources) -> Sources {
        std::mem::replace(&mut self.sources, sources)
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        // shift_remove keeps the remaining dependents in subscription order
        self.dependents.shift_remove(&node_id);
    }

    pub fn is_evaluating(&self) -> bool {
        self.evaluating
    }

    pub fn set_evaluating(&mut self, evaluating: bool) {
        self.evaluating = evaluating;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn mark_disposed(&mut self) {
        self.disposed = true;
    }
}
