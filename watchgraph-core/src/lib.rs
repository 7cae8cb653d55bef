//! Watchgraph Core
//!
//! This crate provides the update models behind three families of change
//! detection, side by side, so they can be compared on the same workload:
//!
//! - Reactive primitives (signals, memos, effects) on a push-pull graph
//! - A bounded dirty-checking digest loop
//! - Explicit refresh gates for the "OnPush" strategy
//!
//! Rendering, templating and input wiring live outside the crate. They
//! drive the core through the operations exposed here and hear back through
//! subscriptions.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Signals, memos, effects and the graph that owns them
//! - `graph`: Node arena and invalidation scheduling behind `reactive`
//! - `digest`: Watchers and the dirty-check scheduler
//! - `strategy`: Refresh policies for component inputs
//! - `task`: Virtual-time timers and oneshot futures that feed mutations in
//! - `config`: Serde-loadable settings
//!
//! # Example
//!
//! ```rust
//! use watchgraph_core::reactive::ReactiveGraph;
//!
//! let graph = ReactiveGraph::new();
//!
//! // Create a signal
//! let count = graph.create_signal(0);
//!
//! // Create a derived value
//! let doubled = graph.create_memo(move |g| Ok(count.get(g) * 2));
//!
//! // Create an effect
//! graph.create_effect(move |g| {
//!     println!("Count: {}, Doubled: {}", count.get(g), doubled.get(g)?);
//!     Ok(())
//! })?;
//!
//! // Update the signal
//! count.set(&graph, 5)?;
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! # Ok::<(), watchgraph_core::Error>(())
//! ```

pub mod config;
pub mod digest;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod strategy;
pub mod task;

pub use config::Config;
pub use error::{Error, Result};
