//! Analysis modules.
//!
//! Aggregation of duplicate captures and the delta engine that compares a
//! run's rows with the stored snapshot.

pub mod aggregator;
pub mod delta;

pub use aggregator::aggregate_rows;
pub use delta::{DeltaEngine, EngineConfig};
