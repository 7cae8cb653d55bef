//! Update Scheduler
//!
//! The scheduler owns the node arena and decides what has to be brought up
//! to date after a source changes.
//!
//! # Algorithm
//!
//! 1. When a source changes, its direct dependents become `Dirty`.
//! 2. Everything reachable from them becomes `MaybeDirty`.
//! 3. Reached effects are reported so the runtime can queue them.
//! 4. Reached memos are reported in topological order (dependencies before
//!    dependents) for eager refreshing.
//!
//! Nothing is recomputed here. Whether a `MaybeDirty` node really has to
//! recompute is decided later by comparing source versions ("push-pull").

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;

use super::node::{Node, NodeId, NodeKind, Sources};

/// Result of marking a source as changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Invalidation {
    /// Reached memos, dependencies before dependents.
    pub memos: Vec<NodeId>,

    /// Reached effects, in registration order.
    pub effects: Vec<NodeId>,
}

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    /// All nodes in the graph. Append-only: the index is the `NodeId`.
    nodes: Vec<Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(Node::new(id, kind));
        id
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(node_id.index())
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node_id.index())
    }

    /// Replace the sources of `node_id` with the ones recorded during its
    /// latest evaluation.
    ///
    /// Only the difference between the old and new edge sets touches the
    /// sources' dependent lists.
    pub fn replace_sources(&mut self, node_id: NodeId, sources: Sources) {
        let Some(node) = self.nodes.get_mut(node_id.index()) else {
            return;
        };
        let old = node.set_sources(sources);

        let new_ids: HashSet<NodeId> = self.nodes[node_id.index()]
            .sources()
            .iter()
            .map(|source| source.node)
            .collect();
        let old_ids: HashSet<NodeId> = old.iter().map(|source| source.node).collect();

        for removed in old_ids.difference(&new_ids) {
            trace!(dependent = %node_id, source = %removed, "dropping stale edge");
            if let Some(source) = self.nodes.get_mut(removed.index()) {
                source.remove_dependent(node_id);
            }
        }

        let added: Vec<NodeId> = self.nodes[node_id.index()]
            .sources()
            .iter()
            .map(|source| source.node)
            .filter(|id| !old_ids.contains(id))
            .collect();
        for source_id in added {
            trace!(dependent = %node_id, source = %source_id, "adding edge");
            if let Some(source) = self.nodes.get_mut(source_id.index()) {
                source.add_dependent(node_id);
            }
        }
    }

    /// Remove every edge in which `node_id` is the dependent.
    pub fn clear_sources(&mut self, node_id: NodeId) {
        self.replace_sources(node_id, Sources::new());
    }

    /// Mark a source node as changed and propagate dirty flags.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Invalidation {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut memos = Vec::new();
        let mut effects = Vec::new();

        // Direct dependents are known to be dirty
        let direct: Vec<NodeId> = self
            .nodes
            .get(source_id.index())
            .map(|source| source.dependents().iter().copied().collect())
            .unwrap_or_default();
        for dependent_id in direct {
            if let Some(dependent) = self.nodes.get_mut(dependent_id.index()) {
                dependent.mark_dirty();
            }
            queue.push_back(dependent_id);
        }

        // BFS to propagate maybe-dirty status
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            let Some(node) = self.nodes.get_mut(node_id.index()) else {
                continue;
            };
            if node.is_disposed() {
                continue;
            }
            node.mark_maybe_dirty();

            match node.kind() {
                NodeKind::Derived => memos.push(node_id),
                NodeKind::Effect => effects.push(node_id),
                NodeKind::Source => {}
            }

            queue.extend(node.dependents().iter().copied());
        }

        effects.sort();
        Invalidation {
            memos: self.topological_sort(memos),
            effects,
        }
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    /// Ties are broken by registration order.
    pub fn topological_sort(&self, mut nodes: Vec<NodeId>) -> Vec<NodeId> {
        nodes.sort();
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for &node_id in &nodes {
            if let Some(node) = self.get_node(node_id) {
                let degree = node
                    .sources()
                    .iter()
                    .filter(|source| node_set.contains(&source.node))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.get_node(node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over every node in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{DirtyState, SourceRef};

    fn sources(ids: &[NodeId]) -> Sources {
        ids.iter()
            .map(|&node| SourceRef { node, version: 0 })
            .collect()
    }

    #[test]
    fn add_nodes_in_order() {
        let mut scheduler = UpdateScheduler::new();

        let id1 = scheduler.add_node(NodeKind::Source);
        let id2 = scheduler.add_node(NodeKind::Derived);

        assert_eq!(scheduler.node_count(), 2);
        assert!(id1 < id2);
        assert_eq!(scheduler.get_node(id2).unwrap().kind(), NodeKind::Derived);
    }

    #[test]
    fn replace_sources_diffs_edges() {
        let mut scheduler = UpdateScheduler::new();

        let a = scheduler.add_node(NodeKind::Source);
        let b = scheduler.add_node(NodeKind::Source);
        let derived = scheduler.add_node(NodeKind::Derived);

        scheduler.replace_sources(derived, sources(&[a]));
        assert!(scheduler.get_node(a).unwrap().dependents().contains(&derived));
        assert!(!scheduler.get_node(b).unwrap().dependents().contains(&derived));

        // Switch the dependency from `a` to `b`
        scheduler.replace_sources(derived, sources(&[b]));
        assert!(!scheduler.get_node(a).unwrap().dependents().contains(&derived));
        assert!(scheduler.get_node(b).unwrap().dependents().contains(&derived));

        scheduler.clear_sources(derived);
        assert!(scheduler.get_node(b).unwrap().dependents().is_empty());
        assert!(scheduler.get_node(derived).unwrap().sources().is_empty());
    }

    #[test]
    fn mark_changed_propagates() {
        let mut scheduler = UpdateScheduler::new();

        // Create a chain: source -> derived1 -> derived2 -> effect
        let source = scheduler.add_node(NodeKind::Source);
        let derived1 = scheduler.add_node(NodeKind::Derived);
        let derived2 = scheduler.add_node(NodeKind::Derived);
        let effect = scheduler.add_node(NodeKind::Effect);

        scheduler.replace_sources(derived1, sources(&[source]));
        scheduler.replace_sources(derived2, sources(&[derived1]));
        scheduler.replace_sources(effect, sources(&[derived2]));

        for id in [derived1, derived2, effect] {
            scheduler.get_node_mut(id).unwrap().mark_clean();
        }

        let invalidation = scheduler.mark_changed(source);

        assert_eq!(invalidation.memos, vec![derived1, derived2]);
        assert_eq!(invalidation.effects, vec![effect]);

        assert_eq!(scheduler.get_node(derived1).unwrap().dirty_state(), DirtyState::Dirty);
        assert_eq!(scheduler.get_node(derived2).unwrap().dirty_state(), DirtyState::MaybeDirty);
        assert_eq!(scheduler.get_node(effect).unwrap().dirty_state(), DirtyState::MaybeDirty);
    }

    #[test]
    fn diamond_reports_each_node_once() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(NodeKind::Source);
        let left = scheduler.add_node(NodeKind::Derived);
        let right = scheduler.add_node(NodeKind::Derived);
        let effect = scheduler.add_node(NodeKind::Effect);

        scheduler.replace_sources(left, sources(&[source]));
        scheduler.replace_sources(right, sources(&[source]));
        scheduler.replace_sources(effect, sources(&[left, right]));

        let invalidation = scheduler.mark_changed(source);
        assert_eq!(invalidation.memos, vec![left, right]);
        assert_eq!(invalidation.effects, vec![effect]);
    }

    #[test]
    fn disposed_nodes_are_skipped() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(NodeKind::Source);
        let effect = scheduler.add_node(NodeKind::Effect);
        scheduler.replace_sources(effect, sources(&[source]));
        scheduler.get_node_mut(effect).unwrap().mark_disposed();

        let invalidation = scheduler.mark_changed(source);
        assert!(invalidation.effects.is_empty());
    }

    #[test]
    fn topological_sort_orders_dependencies_first() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(NodeKind::Source);
        // Registered before its own dependency
        let outer = scheduler.add_node(NodeKind::Derived);
        let inner = scheduler.add_node(NodeKind::Derived);

        scheduler.replace_sources(inner, sources(&[source]));
        scheduler.replace_sources(outer, sources(&[inner]));

        let order = scheduler.topological_sort(vec![outer, inner]);
        assert_eq!(order, vec![inner, outer]);
    }
}
