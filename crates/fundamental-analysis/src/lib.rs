//! Fundamental quality scoring from vendor income statements.

pub mod quality;
pub mod series;
pub mod statement;

pub use quality::{compute_row, QualityConfig, QualityScorer};
pub use series::{build_series, latest_quarters, MarginSeries};
pub use statement::{extract_items, normalize, pick_concept, pick_value, Concept, LineItem};
