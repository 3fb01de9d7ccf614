//! Core deterministic primitives.
//!
//! Both submodules are pure functions of their inputs: the fairness
//! generator maps (seed, nonce) to a crash point, the curve maps elapsed
//! time to a multiplier. Nothing in here touches the clock or the network,
//! which is what makes rounds replayable and auditable.

pub mod curve;
pub mod fair;

// Re-export core types
pub use curve::{multiplier_at, ms_to_multiplier, GROWTH_BASE};
pub use fair::{CrashPointGenerator, FairnessError, MAX_CRASH_POINT, MIN_CRASH_POINT};
