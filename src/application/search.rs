//! Query entry points: rollout routing, legacy fallback, and place details.

use std::{sync::Arc, time::Instant};

use metrics::counter;
use placecache_api_types::PlaceSource;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    application::{
        clock::Clock,
        ledger::CallLedger,
        orchestrator::{CacheOrchestrator, OrchestratorError, elapsed_ms},
        provider::{CallPolicy, ExternalProvider, ProviderError},
        repos::PlaceStore,
        rollout::{PathDecision, RolloutController},
    },
    domain::{
        error::DomainError,
        ledger::{CallLedgerEntry, CallOperation},
        places::{PlaceRecord, PlaceSummary, RankedPlace, sort_by_distance},
        query::NearbyQuery,
        rollout::ServePath,
    },
};

const TARGET: &str = "placecache::application::search";
const MAX_EXTERNAL_ID_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    InvalidQuery(#[from] DomainError),
    #[error("no cached places and the provider is unreachable")]
    ProviderUnavailable(#[source] ProviderError),
    #[error("place `{0}` not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub places: Vec<RankedPlace>,
    pub source: PlaceSource,
    pub path: ServePath,
    /// The cache path failed internally and the legacy path answered.
    pub fell_back: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailOutcome {
    pub record: PlaceRecord,
    pub source: PlaceSource,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct PlaceSearchService {
    orchestrator: CacheOrchestrator,
    rollout: Arc<RolloutController>,
    store: Arc<dyn PlaceStore>,
    provider: Arc<dyn ExternalProvider>,
    ledger: CallLedger,
    clock: Arc<dyn Clock>,
    policy: CallPolicy,
    default_max_age_days: u32,
}

impl PlaceSearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: CacheOrchestrator,
        rollout: Arc<RolloutController>,
        store: Arc<dyn PlaceStore>,
        provider: Arc<dyn ExternalProvider>,
        ledger: CallLedger,
        clock: Arc<dyn Clock>,
        policy: CallPolicy,
        default_max_age_days: u32,
    ) -> Self {
        Self {
            orchestrator,
            rollout,
            store,
            provider,
            ledger,
            clock,
            policy,
            default_max_age_days,
        }
    }

    pub fn default_max_age_days(&self) -> u32 {
        self.default_max_age_days
    }

    pub fn rollout(&self) -> &RolloutController {
        &self.rollout
    }

    /// Route a query for a session and answer it on the chosen path.
    pub async fn search_for_session(
        &self,
        session_id: Option<&str>,
        query: &NearbyQuery,
    ) -> Result<(PathDecision, SearchOutcome), SearchError> {
        let decision = self.rollout.choose_path(session_id);
        let outcome = self.search(query, decision.path).await?;
        Ok((decision, outcome))
    }

    pub async fn search(
        &self,
        query: &NearbyQuery,
        path: ServePath,
    ) -> Result<SearchOutcome, SearchError> {
        let started = Instant::now();
        match path {
            ServePath::Legacy => {
                let places = self.legacy_search(query).await?;
                Ok(SearchOutcome {
                    places,
                    source: PlaceSource::Provider,
                    path,
                    fell_back: false,
                    latency_ms: elapsed_ms(started),
                })
            }
            ServePath::Cache => match self.orchestrator.resolve(query).await {
                Ok(resolution) => Ok(SearchOutcome {
                    places: resolution.places,
                    source: resolution.source,
                    path,
                    fell_back: false,
                    latency_ms: elapsed_ms(started),
                }),
                Err(OrchestratorError::ProviderUnavailable(err)) => {
                    Err(SearchError::ProviderUnavailable(err))
                }
                Err(err) => {
                    counter!("placecache_rollout_fallback_total").increment(1);
                    warn!(
                        target = TARGET,
                        error = %err,
                        cause = %error_chain(&err),
                        "cache path failed; re-issuing query on the legacy path"
                    );
                    let places = self.legacy_search(query).await?;
                    Ok(SearchOutcome {
                        places,
                        source: PlaceSource::Provider,
                        path: ServePath::Legacy,
                        fell_back: true,
                        latency_ms: elapsed_ms(started),
                    })
                }
            },
        }
    }

    /// Always-call-provider path. Results are written to the store in the
    /// background so legacy sessions warm the cache without waiting on it.
    async fn legacy_search(&self, query: &NearbyQuery) -> Result<Vec<RankedPlace>, SearchError> {
        let started = Instant::now();
        let radius_meters = query.radius_meters as f64;
        let attempt = self
            .policy
            .run("legacy_search", || {
                self.provider.search(query.center, radius_meters)
            })
            .await;

        let now = self.clock.now();
        let fingerprint = self.orchestrator.fingerprint(query);
        let entry = CallLedgerEntry::provider_call(
            CallOperation::LegacySearch,
            fingerprint.as_str(),
            self.ledger.unit_cost() * f64::from(attempt.attempts),
            elapsed_ms(started),
            now,
        );

        match attempt.result {
            Ok(summaries) => {
                self.ledger.record(entry);
                self.shadow_write(&summaries, now);
                let mut places: Vec<RankedPlace> = summaries
                    .into_iter()
                    .filter_map(|summary| {
                        let location = summary.location;
                        let distance_meters = query.center.distance_to(&location);
                        (distance_meters <= radius_meters).then(|| RankedPlace {
                            record: summary.into_record(now),
                            location,
                            distance_meters,
                        })
                    })
                    .collect();
                sort_by_distance(&mut places);
                Ok(places)
            }
            Err(err) => {
                self.ledger.record(entry.with_error(err.to_string()));
                Err(SearchError::ProviderUnavailable(err))
            }
        }
    }

    fn shadow_write(&self, summaries: &[PlaceSummary], fetched_at: OffsetDateTime) {
        if summaries.is_empty() {
            return;
        }
        let orchestrator = self.orchestrator.clone();
        let summaries = summaries.to_vec();
        tokio::spawn(async move {
            orchestrator.write_back(&summaries, fetched_at).await;
            debug!(
                target = TARGET,
                places = summaries.len(),
                "legacy results written to the place store"
            );
        });
    }

    /// Cache-first lookup of a single place.
    pub async fn details(
        &self,
        external_id: &str,
        max_age_days: u32,
    ) -> Result<DetailOutcome, SearchError> {
        validate_external_id(external_id)?;
        let started = Instant::now();

        let stored = match self.store.get(external_id).await {
            Ok(record) => record.filter(|record| record.is_active),
            Err(err) => {
                counter!("placecache_rollout_fallback_total").increment(1);
                warn!(
                    target = TARGET,
                    external_id,
                    error = %err,
                    "place store read failed; asking the provider directly"
                );
                None
            }
        };

        if let Some(record) = stored.as_ref()
            && record.is_fresh(max_age_days, self.clock.now())
        {
            self.ledger.record(CallLedgerEntry::cache_hit(
                CallOperation::Details,
                external_id,
                elapsed_ms(started),
                self.clock.now(),
            ));
            return Ok(DetailOutcome {
                record: record.clone(),
                source: PlaceSource::Cache,
                latency_ms: elapsed_ms(started),
            });
        }

        let attempt = self
            .policy
            .run("details", || self.provider.details(external_id))
            .await;
        let now = self.clock.now();
        let entry = CallLedgerEntry::provider_call(
            CallOperation::Details,
            external_id,
            self.ledger.unit_cost() * f64::from(attempt.attempts),
            elapsed_ms(started),
            now,
        );

        match attempt.result {
            Ok(summary) => {
                self.ledger.record(entry);
                let record = summary.into_record(now);
                if let Err(err) = self.store.upsert(record.clone()).await {
                    counter!("placecache_store_write_failed_total").increment(1);
                    warn!(
                        target = TARGET,
                        external_id,
                        error = %err,
                        "failed to cache place details"
                    );
                }
                Ok(DetailOutcome {
                    record,
                    source: PlaceSource::Provider,
                    latency_ms: elapsed_ms(started),
                })
            }
            Err(ProviderError::NotFound(id)) => {
                self.ledger
                    .record(entry.with_error(format!("place `{id}` not found")));
                if stored.is_some() {
                    match self.store.deactivate(external_id).await {
                        Ok(_) => info!(
                            target = TARGET,
                            external_id,
                            "deactivated place the provider no longer knows"
                        ),
                        Err(err) => warn!(
                            target = TARGET,
                            external_id,
                            error = %err,
                            "failed to deactivate unknown place"
                        ),
                    }
                }
                Err(SearchError::NotFound(id))
            }
            Err(err) => {
                self.ledger.record(entry.with_error(err.to_string()));
                match stored {
                    Some(record) => Ok(DetailOutcome {
                        record,
                        source: PlaceSource::Cache,
                        latency_ms: elapsed_ms(started),
                    }),
                    None => Err(SearchError::ProviderUnavailable(err)),
                }
            }
        }
    }
}

fn validate_external_id(external_id: &str) -> Result<(), DomainError> {
    let valid = !external_id.is_empty()
        && external_id.len() <= MAX_EXTERNAL_ID_LEN
        && external_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DomainError::invalid_query(format!(
            "external id `{external_id}` is not a valid provider identifier"
        )))
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages.join(": ")
}
