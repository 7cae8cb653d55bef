//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between signals, memos and effects.
//!
//! # Overview
//!
//! - Nodes represent signals (sources), memos (derived) and effects.
//! - Edges represent dependencies: if A reads B, B lists A as a dependent
//!   and A lists B as a source, together with the version it observed.
//!
//! Nodes are stored in an append-only arena and addressed by integer
//! [`NodeId`]s, so edges are plain adjacency lists and the graph never
//! needs reference cycles or weak pointers.

mod node;
mod scheduler;

pub use node::{DirtyState, Node, NodeId, NodeKind, SourceRef, Sources};
pub use scheduler::{Invalidation, UpdateScheduler};
