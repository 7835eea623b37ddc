//! Consistency engine for generated breakdowns: validation, point mapping,
//! parent aggregation, identity carry-over and edits.

pub mod aggregate;
pub mod edit;
pub mod error;
pub mod mapping;
pub mod reconcile;
pub mod validate;

pub use aggregate::{recalculate_aggregates, total_estimate_hours};
pub use validate::{validate_and_normalize, Validator};
