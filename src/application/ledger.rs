//! Best-effort call ledger and the cost report built on top of it.

use std::sync::Arc;

use metrics::counter;
use time::{Duration, OffsetDateTime};
use tracing::warn;

use crate::{
    application::repos::{CallLedgerRepo, RepoError},
    domain::ledger::{CallLedgerEntry, LedgerReport},
};

#[derive(Clone)]
pub struct CallLedger {
    repo: Arc<dyn CallLedgerRepo>,
    unit_cost: f64,
}

impl CallLedger {
    pub fn new(repo: Arc<dyn CallLedgerRepo>, unit_cost: f64) -> Self {
        Self { repo, unit_cost }
    }

    pub fn unit_cost(&self) -> f64 {
        self.unit_cost
    }

    /// Append without blocking the caller; failures are logged and dropped.
    pub fn record(&self, entry: CallLedgerEntry) {
        let ledger = self.clone();
        tokio::spawn(async move {
            ledger.append(entry).await;
        });
    }

    /// Append inline, swallowing failures.
    pub async fn append(&self, entry: CallLedgerEntry) {
        if let Err(err) = self.repo.append(&entry).await {
            counter!("placecache_ledger_write_failed_total").increment(1);
            warn!(
                target = "placecache::application::ledger",
                entry_id = %entry.id,
                path = entry.path.as_str(),
                operation = entry.operation.as_str(),
                error = %err,
                "call ledger write failed; entry discarded"
            );
        }
    }

    /// Aggregate the last `days` calendar days (today included).
    pub async fn summarize(
        &self,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<LedgerReport, RepoError> {
        let since = summary_window_start(days, now);
        let totals = self.repo.daily_totals(since).await?;
        Ok(LedgerReport::from_days(totals, self.unit_cost))
    }
}

/// Midnight UTC `days - 1` days before `now`.
fn summary_window_start(days: u32, now: OffsetDateTime) -> OffsetDateTime {
    let span = i64::from(days.max(1)) - 1;
    let start_date = (now - Duration::days(span)).date();
    start_date.midnight().assume_utc()
}
