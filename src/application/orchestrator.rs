//! Cache-first resolution of nearby queries with coalesced provider calls.

use std::{collections::HashMap, sync::Arc, time::Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use placecache_api_types::PlaceSource;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    application::{
        clock::Clock,
        inflight::{Flight, FlightError, InFlight},
        ledger::CallLedger,
        provider::{CallPolicy, ExternalProvider, ProviderError},
        repos::{PlaceStore, RepoError},
    },
    domain::{
        ledger::{CallLedgerEntry, CallOperation},
        places::{PlaceSummary, RadiusResult, RankedPlace, sort_by_distance},
        query::{NearbyQuery, QueryFingerprint},
    },
};

const TARGET: &str = "placecache::application::orchestrator";

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Minimum number of fresh cached places that counts as coverage.
    pub min_coverage: usize,
    /// Decimal places kept when normalizing coordinates for coalescing.
    pub coalesce_precision: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_coverage: 1,
            coalesce_precision: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("place store unavailable")]
    Store(#[from] RepoError),
    #[error("coalesced search failed")]
    Flight(#[from] FlightError),
    #[error("no cached places and the provider is unreachable")]
    ProviderUnavailable(#[source] ProviderError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub places: Vec<RankedPlace>,
    pub source: PlaceSource,
}

/// Value published to every waiter of one coalesced search.
#[derive(Debug, Clone)]
enum FlightOutcome {
    /// The leader's second look at the store found coverage.
    Covered,
    Fetched {
        places: Arc<Vec<PlaceSummary>>,
        fetched_at: OffsetDateTime,
    },
    Failed(ProviderError),
}

#[derive(Clone)]
pub struct CacheOrchestrator {
    store: Arc<dyn PlaceStore>,
    provider: Arc<dyn ExternalProvider>,
    ledger: CallLedger,
    clock: Arc<dyn Clock>,
    policy: CallPolicy,
    settings: OrchestratorSettings,
    flights: InFlight<FlightOutcome>,
}

impl CacheOrchestrator {
    pub fn new(
        store: Arc<dyn PlaceStore>,
        provider: Arc<dyn ExternalProvider>,
        ledger: CallLedger,
        clock: Arc<dyn Clock>,
        policy: CallPolicy,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            provider,
            ledger,
            clock,
            policy,
            settings,
            flights: InFlight::new(),
        }
    }

    pub fn fingerprint(&self, query: &NearbyQuery) -> QueryFingerprint {
        query.fingerprint(self.settings.coalesce_precision)
    }

    /// Number of provider searches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Single coverage predicate: enough fresh places within the radius.
    pub fn covers(&self, result: &RadiusResult) -> bool {
        result.fresh.len() >= self.settings.min_coverage
    }

    pub async fn resolve(&self, query: &NearbyQuery) -> Result<Resolution, OrchestratorError> {
        let started = Instant::now();
        let fingerprint = self.fingerprint(query);
        let cached = self
            .store
            .query_within_radius(&query.radius_query(), self.clock.now())
            .await?;

        let resolution = if self.covers(&cached) {
            counter!("placecache_cache_hit_total").increment(1);
            debug!(
                target = TARGET,
                fingerprint = %fingerprint,
                fresh = cached.fresh.len(),
                "query covered by cache"
            );
            self.record_cache_hit(&fingerprint, started, None);
            Resolution {
                places: cached.fresh,
                source: PlaceSource::Cache,
            }
        } else {
            counter!("placecache_cache_miss_total").increment(1);
            let outcome = self.join_flight(query, &fingerprint).await?;
            self.settle(query, &fingerprint, cached, outcome, started)
                .await?
        };

        histogram!("placecache_resolve_ms").record(elapsed_ms(started) as f64);
        Ok(resolution)
    }

    async fn settle(
        &self,
        query: &NearbyQuery,
        fingerprint: &QueryFingerprint,
        cached: RadiusResult,
        outcome: FlightOutcome,
        started: Instant,
    ) -> Result<Resolution, OrchestratorError> {
        match outcome {
            FlightOutcome::Covered => {
                let refreshed = self
                    .store
                    .query_within_radius(&query.radius_query(), self.clock.now())
                    .await?;
                self.record_cache_hit(fingerprint, started, None);
                Ok(Resolution {
                    places: refreshed.fresh,
                    source: PlaceSource::Cache,
                })
            }
            FlightOutcome::Fetched { places, fetched_at } => Ok(Resolution {
                places: merge_fetched(query, cached.fresh, &places, fetched_at),
                source: PlaceSource::Provider,
            }),
            FlightOutcome::Failed(err) => {
                let RadiusResult { fresh, stale } = cached;
                let places = if !fresh.is_empty() { fresh } else { stale };
                if places.is_empty() {
                    return Err(OrchestratorError::ProviderUnavailable(err));
                }
                warn!(
                    target = TARGET,
                    fingerprint = %fingerprint,
                    error = %err,
                    served = places.len(),
                    "provider failed; serving cached places"
                );
                self.record_cache_hit(fingerprint, started, Some(err.to_string()));
                Ok(Resolution {
                    places,
                    source: PlaceSource::Cache,
                })
            }
        }
    }

    async fn join_flight(
        &self,
        query: &NearbyQuery,
        fingerprint: &QueryFingerprint,
    ) -> Result<FlightOutcome, OrchestratorError> {
        match self.flights.join_or_lead(fingerprint) {
            Flight::Leader(lease) => {
                let waiter = lease.waiter();
                let orchestrator = self.clone();
                let query = *query;
                let fingerprint = fingerprint.clone();
                // Detached so the billed call completes even if this caller goes away.
                tokio::spawn(async move {
                    let outcome = orchestrator.run_flight(&query, &fingerprint).await;
                    lease.complete(outcome);
                });
                Ok(waiter.wait().await?)
            }
            Flight::Follower(waiter) => {
                counter!("placecache_coalesced_wait_total").increment(1);
                debug!(
                    target = TARGET,
                    fingerprint = %fingerprint,
                    "joining in-flight provider search"
                );
                Ok(waiter.wait().await?)
            }
        }
    }

    async fn run_flight(&self, query: &NearbyQuery, fingerprint: &QueryFingerprint) -> FlightOutcome {
        match self
            .store
            .query_within_radius(&query.radius_query(), self.clock.now())
            .await
        {
            Ok(result) if self.covers(&result) => return FlightOutcome::Covered,
            Ok(_) => {}
            Err(err) => {
                warn!(
                    target = TARGET,
                    fingerprint = %fingerprint,
                    error = %err,
                    "coverage re-check failed; calling provider"
                );
            }
        }

        let started = Instant::now();
        let radius_meters = query.radius_meters as f64;
        let attempt = self
            .policy
            .run("search", || self.provider.search(query.center, radius_meters))
            .await;
        let fetched_at = self.clock.now();
        let entry = CallLedgerEntry::provider_call(
            CallOperation::Search,
            fingerprint.as_str(),
            self.ledger.unit_cost() * f64::from(attempt.attempts),
            elapsed_ms(started),
            fetched_at,
        );

        match attempt.result {
            Ok(places) => {
                self.write_back(&places, fetched_at).await;
                self.ledger.record(entry);
                FlightOutcome::Fetched {
                    places: Arc::new(places),
                    fetched_at,
                }
            }
            Err(err) => {
                self.ledger.record(entry.with_error(err.to_string()));
                FlightOutcome::Failed(err)
            }
        }
    }

    /// Upsert provider results; failures leave the record unrefreshed.
    pub(crate) async fn write_back(&self, places: &[PlaceSummary], fetched_at: OffsetDateTime) {
        let writes = places.iter().map(|summary| {
            let record = summary.clone().into_record(fetched_at);
            async move {
                let external_id = record.external_id.clone();
                (external_id, self.store.upsert(record).await)
            }
        });

        for (external_id, result) in join_all(writes).await {
            if let Err(err) = result {
                counter!("placecache_store_write_failed_total").increment(1);
                warn!(
                    target = TARGET,
                    external_id = %external_id,
                    error = %err,
                    "failed to write provider result to the place store"
                );
            }
        }
    }

    fn record_cache_hit(
        &self,
        fingerprint: &QueryFingerprint,
        started: Instant,
        error: Option<String>,
    ) {
        let mut entry = CallLedgerEntry::cache_hit(
            CallOperation::Search,
            fingerprint.as_str(),
            elapsed_ms(started),
            self.clock.now(),
        );
        entry.error_message = error;
        self.ledger.record(entry);
    }
}

/// Union of fresh cached places and fetched places; fetched copies win.
fn merge_fetched(
    query: &NearbyQuery,
    fresh: Vec<RankedPlace>,
    fetched: &[PlaceSummary],
    fetched_at: OffsetDateTime,
) -> Vec<RankedPlace> {
    let radius_meters = query.radius_meters as f64;
    let mut by_id: HashMap<String, RankedPlace> = fresh
        .into_iter()
        .map(|place| (place.record.external_id.clone(), place))
        .collect();

    for summary in fetched {
        let distance_meters = query.center.distance_to(&summary.location);
        if distance_meters > radius_meters {
            continue;
        }
        let location = summary.location;
        let record = summary.clone().into_record(fetched_at);
        by_id.insert(
            record.external_id.clone(),
            RankedPlace {
                record,
                location,
                distance_meters,
            },
        );
    }

    let mut places: Vec<RankedPlace> = by_id.into_values().collect();
    sort_by_distance(&mut places);
    places
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
