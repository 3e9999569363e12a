//! Allocation strategy — source scoring and hysteresis-guarded reallocation.
//!
//! Both halves are pure: they read sources and positions and return
//! decisions. Locking and persistence belong to the ledger.

pub mod rebalance;
pub mod scoring;

pub use rebalance::ReallocationPolicy;
pub use scoring::{score, select_optimal};
