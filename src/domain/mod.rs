//! Domain layer types and invariants.

pub mod error;
pub mod geo;
pub mod ledger;
pub mod places;
pub mod query;
pub mod rollout;
