//! Composite ranking and the daily leaderboard run.

pub mod composite;
pub mod retention;

pub use composite::{CompositeAggregator, CompositeWeights};
pub use retention::{RetentionConfig, RetentionManager, RunState, RunSummary};
