//! Periodic refresh of the oldest stale places via provider details.

use std::{sync::Arc, time::Duration as StdDuration, time::Instant};

use metrics::counter;
use time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    application::{
        clock::Clock,
        ledger::CallLedger,
        orchestrator::elapsed_ms,
        provider::{CallPolicy, ExternalProvider, ProviderError},
        repos::{PlaceStore, RepoError},
    },
    domain::{
        ledger::{CallLedgerEntry, CallOperation},
        places::UpsertOutcome,
    },
};

const TARGET: &str = "placecache::application::refresh";

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    /// Records fetched longer ago than this are refreshed.
    pub max_age_days: u32,
    pub batch_limit: u32,
    /// Pause between consecutive provider calls.
    pub pacing: StdDuration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub examined: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deactivated: usize,
    pub errors: usize,
    pub total_cost: f64,
    /// The provider rate limited the batch and the remainder was skipped.
    pub aborted: bool,
}

pub struct StaleRefresher {
    store: Arc<dyn PlaceStore>,
    provider: Arc<dyn ExternalProvider>,
    ledger: CallLedger,
    clock: Arc<dyn Clock>,
    policy: CallPolicy,
    settings: RefreshSettings,
}

impl StaleRefresher {
    pub fn new(
        store: Arc<dyn PlaceStore>,
        provider: Arc<dyn ExternalProvider>,
        ledger: CallLedger,
        clock: Arc<dyn Clock>,
        policy: CallPolicy,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            store,
            provider,
            ledger,
            clock,
            policy,
            settings,
        }
    }

    /// Refresh one batch of stale records, oldest first.
    pub async fn run_once(&self) -> Result<RefreshReport, RepoError> {
        let older_than = self.clock.now() - Duration::days(i64::from(self.settings.max_age_days));
        let stale = self
            .store
            .list_stale(older_than, self.settings.batch_limit)
            .await?;

        info!(
            target = TARGET,
            candidates = stale.len(),
            max_age_days = self.settings.max_age_days,
            "starting stale refresh"
        );

        let mut report = RefreshReport::default();
        for (index, record) in stale.into_iter().enumerate() {
            if index > 0 && !self.settings.pacing.is_zero() {
                tokio::time::sleep(self.settings.pacing).await;
            }
            report.examined += 1;

            let started = Instant::now();
            let attempt = self
                .policy
                .run("refresh", || self.provider.details(&record.external_id))
                .await;
            let now = self.clock.now();
            let cost = self.ledger.unit_cost() * f64::from(attempt.attempts);
            report.total_cost += cost;
            let entry = CallLedgerEntry::provider_call(
                CallOperation::Refresh,
                record.external_id.as_str(),
                cost,
                elapsed_ms(started),
                now,
            );

            match attempt.result {
                Ok(summary) => {
                    self.ledger.append(entry).await;
                    let changed = record.provider_fields_differ(&summary);
                    match self.store.upsert(summary.into_record(now)).await {
                        Ok(UpsertOutcome::RejectedStale) => report.unchanged += 1,
                        Ok(_) if changed => report.updated += 1,
                        Ok(_) => report.unchanged += 1,
                        Err(err) => {
                            counter!("placecache_store_write_failed_total").increment(1);
                            warn!(
                                target = TARGET,
                                external_id = %record.external_id,
                                error = %err,
                                "failed to store refreshed place"
                            );
                            report.errors += 1;
                        }
                    }
                }
                Err(ProviderError::NotFound(_)) => {
                    self.ledger
                        .append(entry.with_error("place no longer known to provider"))
                        .await;
                    match self.store.deactivate(&record.external_id).await {
                        Ok(_) => report.deactivated += 1,
                        Err(err) => {
                            warn!(
                                target = TARGET,
                                external_id = %record.external_id,
                                error = %err,
                                "failed to deactivate place"
                            );
                            report.errors += 1;
                        }
                    }
                }
                Err(err @ ProviderError::RateLimited(_)) => {
                    self.ledger.append(entry.with_error(err.to_string())).await;
                    warn!(
                        target = TARGET,
                        external_id = %record.external_id,
                        error = %err,
                        "provider rate limited the refresh; stopping batch"
                    );
                    report.errors += 1;
                    report.aborted = true;
                    break;
                }
                Err(err) => {
                    self.ledger.append(entry.with_error(err.to_string())).await;
                    warn!(
                        target = TARGET,
                        external_id = %record.external_id,
                        error = %err,
                        "failed to refresh place"
                    );
                    report.errors += 1;
                }
            }
        }

        info!(
            target = TARGET,
            examined = report.examined,
            updated = report.updated,
            unchanged = report.unchanged,
            deactivated = report.deactivated,
            errors = report.errors,
            total_cost = report.total_cost,
            aborted = report.aborted,
            "stale refresh finished"
        );
        Ok(report)
    }

    /// Run [`StaleRefresher::run_once`] every `every`, skipping the immediate tick.
    pub fn spawn_interval(self: Arc<Self>, every: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(err) = self.run_once().await {
                    error!(
                        target = TARGET,
                        error = %err,
                        "stale refresh batch failed"
                    );
                }
            }
        })
    }
}
