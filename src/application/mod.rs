//! Application services: cache orchestration, rollout routing, and cost accounting.

pub mod clock;
pub mod error;
pub mod inflight;
pub mod ledger;
pub mod orchestrator;
pub mod provider;
pub mod refresh;
pub mod repos;
pub mod rollout;
pub mod search;
