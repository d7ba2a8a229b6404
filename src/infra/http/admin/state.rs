use std::sync::Arc;

use crate::application::{clock::Clock, ledger::CallLedger, rollout::RolloutController};
use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct AdminState {
    pub rollout: Arc<RolloutController>,
    pub ledger: CallLedger,
    pub clock: Arc<dyn Clock>,
    /// Absent when places and the ledger live in memory.
    pub db: Option<PostgresRepositories>,
}
