//! Error types shared by every change-detection model in the crate.

use std::fmt;

use thiserror::Error;

use crate::digest::WatcherHandle;
use crate::graph::NodeId;
use crate::reactive::SubscriberId;
use crate::task::TaskId;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the reactive graph, the digest scheduler, strategy
/// gates and the task queue.
#[derive(Debug, Error)]
pub enum Error {
    /// A memo read itself while computing, directly or through other memos.
    ///
    /// The evaluation is aborted and every memo on the stack keeps its last
    /// consistent value.
    #[error("cyclic dependency detected while evaluating {node}")]
    CyclicDependency { node: NodeId },

    /// The referenced registration does not exist (any more).
    #[error("{0} not found")]
    NotFound(NotFound),

    /// A digest hit its pass limit with watchers still dirty.
    ///
    /// `run_digest` reports this as a result field; this variant only appears
    /// when a caller opts in through `DigestResult::into_result`.
    #[error("digest did not converge after {passes} passes")]
    DigestNotConverged { passes: usize },

    /// A computation that must be pure tried to mutate state.
    #[error("illegal side effect: {0}")]
    IllegalSideEffect(SideEffect),

    /// A digest was started from inside a running digest.
    #[error("a digest is already in progress")]
    DigestInProgress,

    /// `run_digest` was asked to run zero passes.
    #[error("digest pass limit must be at least 1")]
    InvalidPassLimit,

    /// A single flush ran more effects than the configured limit, which
    /// almost always means an effect writes to something it reads.
    #[error("effect flush exceeded {runs} runs; an effect is probably writing to its own dependency")]
    RunawayEffects { runs: usize },

    /// A node handle was used with a graph that did not create it.
    #[error("{node} belongs to a different graph")]
    ForeignNode { node: NodeId },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// The kind of registration a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFound {
    Effect(NodeId),
    Watcher(WatcherHandle),
    Subscriber(SubscriberId),
    Task(TaskId),
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Effect(id) => write!(f, "effect {id}"),
            NotFound::Watcher(handle) => write!(f, "{handle}"),
            NotFound::Subscriber(id) => write!(f, "subscriber {id:?}"),
            NotFound::Task(id) => write!(f, "{id}"),
        }
    }
}

/// Describes the mutation a pure computation attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// A memo wrote to a signal while being evaluated.
    SignalWriteInMemo { memo: NodeId, signal: NodeId },

    /// A watcher was registered while a digest was running.
    WatcherAdded { name: String },

    /// A watcher was removed while a digest was running.
    WatcherRemoved { watcher: WatcherHandle },
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideEffect::SignalWriteInMemo { memo, signal } => {
                write!(f, "{memo} wrote to {signal} while computing")
            }
            SideEffect::WatcherAdded { name } => {
                write!(f, "watcher `{name}` added during a digest")
            }
            SideEffect::WatcherRemoved { watcher } => {
                write!(f, "{watcher} removed during a digest")
            }
        }
    }
}
