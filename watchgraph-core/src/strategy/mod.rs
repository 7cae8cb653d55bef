//! Change-Detection Strategies
//!
//! A gate sits between a component and whoever drives change detection. It
//! decides whether the component may be re-evaluated on the next cycle.
//!
//! With [`Policy::Default`] the answer is always yes. With
//! [`Policy::OnPush`] the answer is yes only after the parent handed over a
//! new input reference, an event handler ran, a bound async source emitted,
//! or someone called [`StrategyGate::mark_for_check`]. Mutating the current
//! input in place is invisible to an `OnPush` gate.

mod gate;

pub use gate::{AsyncBinding, Policy, RefreshReason, StrategyGate};
