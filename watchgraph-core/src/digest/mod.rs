//! Dirty Checking
//!
//! The legacy change-detection model: no dependency tracking at all, just a
//! list of watchers, each remembering the last value its check returned.
//! A digest polls all of them until nothing changes any more.
//!
//! Listeners may change what other watchers observe, so one digest can take
//! several passes to settle. The pass limit turns an oscillating watcher
//! set into a reported failure instead of a hang.

mod scheduler;
mod watcher;

pub use scheduler::{DigestResult, DirtyCheckScheduler};
pub use watcher::WatcherHandle;
