//! Reactive Context
//!
//! The tracking stack records which computation is currently running, so
//! that reads can register the running computation as a dependent.
//!
//! # Implementation
//!
//! Each graph owns one stack. Entering a memo or effect pushes a frame;
//! every read while the frame is on top is appended to it. When the
//! computation completes the frame is popped and its reads become the
//! node's new source list.
//!
//! Nested frames are normal: a memo that reads another memo that has to
//! recompute pushes a second frame on top of the first.

use crate::graph::{NodeId, SourceRef, Sources};

/// What kind of computation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Memo,
    Effect,
    /// Reads are discarded.
    Untracked,
}

/// An entry in the tracking stack.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The node being computed (`None` for untracked frames).
    pub owner: Option<NodeId>,
    pub kind: FrameKind,
    /// Sources read so far, first read first.
    pub sources: Sources,
    /// Set when a cycle was detected anywhere above this frame.
    pub cycle: Option<NodeId>,
}

/// Stack of running computations for one graph.
#[derive(Debug, Default)]
pub struct TrackingStack {
    frames: Vec<Frame>,
}

impl TrackingStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame and return the depth to pass to [`TrackingStack::exit`].
    pub fn enter(&mut self, owner: Option<NodeId>, kind: FrameKind) -> usize {
        self.frames.push(Frame {
            owner,
            kind,
            sources: Sources::new(),
            cycle: None,
        });
        self.frames.len()
    }

    /// Pop the frame created by the matching `enter`.
    ///
    /// Frames left above it (a computation that unwound without exiting)
    /// are discarded as well.
    pub fn exit(&mut self, depth: usize) -> Option<Frame> {
        debug_assert!(depth >= 1 && depth <= self.frames.len(), "tracking frame exited twice");
        self.frames.truncate(depth);
        self.frames.pop()
    }

    pub fn is_active(&self) -> bool {
        self.frames
            .last()
            .is_some_and(|frame| frame.kind != FrameKind::Untracked)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The computation currently being tracked, if any.
    pub fn current_owner(&self) -> Option<NodeId> {
        self.frames.last().and_then(|frame| frame.owner)
    }

    /// Record a read of `node` at `version` in the top frame.
    ///
    /// Repeated reads of the same node keep the first position.
    pub fn track(&mut self, node: NodeId, version: u64) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if frame.kind == FrameKind::Untracked || frame.owner == Some(node) {
            return;
        }
        match frame.sources.iter_mut().find(|source| source.node == node) {
            Some(existing) => existing.version = version,
            None => frame.sources.push(SourceRef { node, version }),
        }
    }

    /// The innermost memo being evaluated, if any frame on the stack is one.
    pub fn evaluating_memo(&self) -> Option<NodeId> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.kind == FrameKind::Memo)
            .and_then(|frame| frame.owner)
    }

    /// Poison every frame on the stack after a cycle through `node`.
    pub fn fail_all(&mut self, node: NodeId) {
        for frame in &mut self.frames {
            frame.cycle.get_or_insert(node);
        }
    }
}
