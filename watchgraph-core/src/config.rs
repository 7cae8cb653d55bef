//! Configuration
//!
//! Runtime settings for the reactive graph and the digest scheduler. Every
//! field has a default, so an empty JSON object is a valid configuration.
//!
//! ```rust
//! use watchgraph_core::config::{Config, PropagationMode, SideEffectPolicy};
//!
//! let config = Config::from_json(r#"{
//!     "graph": { "mode": "eager" },
//!     "digest": { "max_passes": 5, "side_effects": "snapshot" }
//! }"#).unwrap();
//!
//! assert_eq!(config.graph.mode, PropagationMode::Eager);
//! assert_eq!(config.digest.max_passes, 5);
//! assert_eq!(config.digest.side_effects, SideEffectPolicy::Snapshot);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of digest passes before giving up.
pub const DEFAULT_MAX_PASSES: usize = 10;

/// Default number of effect runs a single flush may perform.
pub const DEFAULT_MAX_EFFECT_RUNS: usize = 10_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub graph: GraphConfig,
    pub digest: DigestConfig,
}

impl Config {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// When memos are brought up to date after a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationMode {
    /// Memos recompute on the first read after invalidation.
    #[default]
    Lazy,

    /// Stale memos recompute at the end of every flush, before effects run.
    Eager,
}

/// Reactive graph settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub mode: PropagationMode,

    /// Upper bound on effect runs in a single flush.
    pub max_effect_runs_per_flush: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            mode: PropagationMode::Lazy,
            max_effect_runs_per_flush: DEFAULT_MAX_EFFECT_RUNS,
        }
    }
}

/// What the digest scheduler does when a check or listener changes the
/// watcher set mid-digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffectPolicy {
    /// Fail the mutation and abort the digest.
    #[default]
    Reject,

    /// Accept the mutation and apply it at the start of the next pass.
    Snapshot,
}

/// Digest scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub max_passes: usize,
    pub side_effects: SideEffectPolicy,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            side_effects: SideEffectPolicy::Reject,
        }
    }
}
