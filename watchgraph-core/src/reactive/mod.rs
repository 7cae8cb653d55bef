//! Reactive Primitives
//!
//! This module implements the push-pull reactive graph: signals, memos, and
//! effects, all owned by an explicit [`ReactiveGraph`].
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a memo or effect is running, that computation is registered as a
//! dependent. When the signal's value changes, all dependents are
//! invalidated.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies actually changed, and it only notifies its
//! own dependents when its result did.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as a renderer or a log.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: every read goes through the graph,
//! which records it in the frame of the computation currently running.
//! There is no global or thread-local state, so independent graphs can live
//! side by side (one per test, for instance).
//!
//! Writes push invalidation down the graph; reads pull recomputation up
//! from the sources. Effects are flushed in registration order, once per
//! write or once per outermost [`ReactiveGraph::batch`], after all the memos
//! they read are up to date. No effect ever observes a half-updated graph.

mod batch;
mod context;
mod effect;
mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use batch::BatchGuard;
pub use effect::Effect;
pub use memo::Memo;
pub use runtime::{GraphId, ReactiveGraph};
pub use signal::Signal;
pub use subscriber::{Subscriber, SubscriberId, Subscribers};
