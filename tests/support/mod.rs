#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use placecache::application::clock::ManualClock;
use placecache::application::ledger::CallLedger;
use placecache::application::orchestrator::{CacheOrchestrator, OrchestratorSettings};
use placecache::application::provider::{CallPolicy, ExternalProvider, ProviderError};
use placecache::application::rollout::{RolloutController, ScriptedBuckets};
use placecache::application::search::PlaceSearchService;
use placecache::domain::geo::GeoPoint;
use placecache::domain::ledger::CallLedgerEntry;
use placecache::domain::places::PlaceSummary;
use placecache::domain::rollout::RolloutConfig;
use placecache::infra::memory::{InMemoryCallLedger, InMemoryPlaceStore};
use std::num::NonZeroUsize;
use time::OffsetDateTime;
use time::macros::datetime;

pub const UNIT_COST: f64 = 0.032;
pub const START: OffsetDateTime = datetime!(2026-04-01 09:00 UTC);

pub fn summary(id: &str, lat: f64, lng: f64) -> PlaceSummary {
    PlaceSummary {
        external_id: id.to_string(),
        name: Some(format!("Place {id}")),
        address: Some("1 George St, Sydney NSW 2000, Australia".to_string()),
        location: GeoPoint::new(lat, lng).expect("valid point"),
        rating: Some(4.5),
        review_count: Some(12),
        phone: None,
        website: None,
        business_status: Some("OPERATIONAL".to_string()),
        open_now: None,
    }
}

/// Places around Sydney CBD, all within 5 km of (-33.8688, 151.2093).
pub fn sydney_places() -> Vec<PlaceSummary> {
    vec![
        summary("town-hall", -33.8732, 151.2061),
        summary("opera-house", -33.8568, 151.2153),
        summary("central", -33.8832, 151.2065),
    ]
}

/// Provider double that replays scripted search results and counts calls.
#[derive(Default)]
pub struct ScriptedProvider {
    searches: Mutex<VecDeque<Result<Vec<PlaceSummary>, ProviderError>>>,
    fallback: Mutex<Option<Result<Vec<PlaceSummary>, ProviderError>>>,
    details: Mutex<HashMap<String, Result<PlaceSummary, ProviderError>>>,
    delay: Mutex<Option<Duration>>,
    search_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn returning(places: Vec<PlaceSummary>) -> Arc<Self> {
        let provider = Self::default();
        provider.always(Ok(places));
        Arc::new(provider)
    }

    pub fn always(&self, result: Result<Vec<PlaceSummary>, ProviderError>) {
        *self.fallback.lock().expect("fallback lock") = Some(result);
    }

    pub fn push_search(&self, result: Result<Vec<PlaceSummary>, ProviderError>) {
        self.searches
            .lock()
            .expect("searches lock")
            .push_back(result);
    }

    pub fn set_details(&self, external_id: &str, result: Result<PlaceSummary, ProviderError>) {
        self.details
            .lock()
            .expect("details lock")
            .insert(external_id.to_string(), result);
    }

    pub fn delay_searches(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalProvider for ScriptedProvider {
    async fn search(
        &self,
        _center: GeoPoint,
        _radius_meters: f64,
    ) -> Result<Vec<PlaceSummary>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.searches.lock().expect("searches lock").pop_front();
        match scripted {
            Some(result) => result,
            None => self
                .fallback
                .lock()
                .expect("fallback lock")
                .clone()
                .unwrap_or_else(|| Ok(Vec::new())),
        }
    }

    async fn details(&self, external_id: &str) -> Result<PlaceSummary, ProviderError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .lock()
            .expect("details lock")
            .get(external_id)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::NotFound(external_id.to_string())))
    }
}

/// In-memory wiring of the whole query pipeline over a manual clock.
pub struct Harness {
    pub store: Arc<InMemoryPlaceStore>,
    pub ledger_repo: Arc<InMemoryCallLedger>,
    pub ledger: CallLedger,
    pub provider: Arc<ScriptedProvider>,
    pub clock: Arc<ManualClock>,
    pub orchestrator: CacheOrchestrator,
}

impl Harness {
    pub fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self::with_store(provider, Arc::new(InMemoryPlaceStore::new()))
    }

    pub fn with_store(provider: Arc<ScriptedProvider>, store: Arc<InMemoryPlaceStore>) -> Self {
        let ledger_repo = Arc::new(InMemoryCallLedger::new());
        let ledger = CallLedger::new(ledger_repo.clone(), UNIT_COST);
        let clock = Arc::new(ManualClock::new(START));
        let orchestrator = CacheOrchestrator::new(
            store.clone(),
            provider.clone(),
            ledger.clone(),
            clock.clone(),
            CallPolicy::new(Duration::from_secs(2)),
            OrchestratorSettings::default(),
        );
        Self {
            store,
            ledger_repo,
            ledger,
            provider,
            clock,
            orchestrator,
        }
    }

    pub fn rollout(&self, config: RolloutConfig, buckets: Vec<u8>) -> Arc<RolloutController> {
        Arc::new(RolloutController::new(
            config,
            NonZeroUsize::new(64).expect("non-zero"),
            Arc::new(ScriptedBuckets::new(buckets)),
        ))
    }

    pub fn service(&self, config: RolloutConfig, buckets: Vec<u8>) -> PlaceSearchService {
        self.service_with(self.rollout(config, buckets))
    }

    pub fn service_with(&self, rollout: Arc<RolloutController>) -> PlaceSearchService {
        PlaceSearchService::new(
            self.orchestrator.clone(),
            rollout,
            self.store.clone(),
            self.provider.clone(),
            self.ledger.clone(),
            self.clock.clone(),
            CallPolicy::new(Duration::from_secs(2)),
            30,
        )
    }

    /// Wait until the detached ledger writes have landed.
    pub async fn ledger_entries(&self, expected: usize) -> Vec<CallLedgerEntry> {
        for _ in 0..200 {
            let entries = self.ledger_repo.entries();
            if entries.len() >= expected {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.ledger_repo.entries()
    }

    /// Wait until background store writes have landed.
    pub async fn stored_places(&self, expected: usize) -> usize {
        for _ in 0..200 {
            if self.store.len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.store.len()
    }
}
