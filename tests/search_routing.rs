mod support;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use placecache::application::ledger::CallLedger;
use placecache::application::orchestrator::{CacheOrchestrator, OrchestratorSettings};
use placecache::application::provider::{CallPolicy, ProviderError};
use placecache::application::repos::{PlaceStore, RepoError};
use placecache::application::rollout::{RandomBuckets, RolloutController};
use placecache::application::search::{PlaceSearchService, SearchError};
use placecache::domain::ledger::{CallOperation, CallPath};
use placecache::domain::places::{PlaceRecord, RadiusQuery, RadiusResult, UpsertOutcome};
use placecache::domain::query::NearbyQuery;
use placecache::domain::rollout::{RolloutConfig, ServePath};
use placecache::infra::memory::InMemoryCallLedger;
use placecache_api_types::PlaceSource;
use std::num::NonZeroUsize;
use time::{Duration, OffsetDateTime};

use support::{Harness, START, ScriptedProvider, UNIT_COST, summary, sydney_places};

fn sydney_query() -> NearbyQuery {
    NearbyQuery::new(-33.8688, 151.2093, 5_000, 30).expect("valid query")
}

fn config(enabled: bool, percentage: u8) -> RolloutConfig {
    RolloutConfig::new(enabled, percentage).expect("valid config")
}

#[tokio::test]
async fn disabled_rollout_always_uses_the_legacy_path() {
    let harness = Harness::new(ScriptedProvider::returning(sydney_places()));
    let service = harness.service(config(false, 100), vec![0]);

    for _ in 0..2 {
        let (decision, outcome) = service
            .search_for_session(Some("session-a"), &sydney_query())
            .await
            .expect("legacy answers");
        assert_eq!(decision.path, ServePath::Legacy);
        assert_eq!(outcome.source, PlaceSource::Provider);
        assert_eq!(outcome.places.len(), 3);
    }

    assert_eq!(harness.provider.search_calls(), 2);

    let entries = harness.ledger_entries(2).await;
    assert!(
        entries
            .iter()
            .all(|entry| entry.operation == CallOperation::LegacySearch
                && entry.path == CallPath::ProviderCall)
    );
}

#[tokio::test]
async fn legacy_results_warm_the_cache_for_later_sessions() {
    let harness = Harness::new(ScriptedProvider::returning(sydney_places()));
    let service = harness.service(config(true, 50), vec![90, 10]);

    let (legacy, outcome) = service
        .search_for_session(Some("legacy-user"), &sydney_query())
        .await
        .expect("legacy answers");
    assert_eq!(legacy.path, ServePath::Legacy);
    assert_eq!(outcome.source, PlaceSource::Provider);
    assert_eq!(harness.stored_places(3).await, 3);

    let (cached, outcome) = service
        .search_for_session(Some("cache-user"), &sydney_query())
        .await
        .expect("cache answers");
    assert_eq!(cached.path, ServePath::Cache);
    assert_eq!(outcome.source, PlaceSource::Cache);
    assert_eq!(outcome.places.len(), 3);
    assert_eq!(harness.provider.search_calls(), 1);
}

#[tokio::test]
async fn full_rollout_routes_every_session_through_the_cache() {
    let harness = Harness::new(ScriptedProvider::returning(sydney_places()));
    let service = harness.service(config(true, 100), vec![99]);

    let (first_decision, first) = service
        .search_for_session(None, &sydney_query())
        .await
        .expect("cache path answers");
    assert!(first_decision.issued);
    assert_eq!(first_decision.path, ServePath::Cache);
    assert_eq!(first.source, PlaceSource::Provider);

    let (_, second) = service
        .search_for_session(Some("someone-else"), &sydney_query())
        .await
        .expect("cache path answers");
    assert_eq!(second.source, PlaceSource::Cache);
    assert_eq!(harness.provider.search_calls(), 1);
}

#[tokio::test]
async fn sessions_keep_their_path_across_config_changes() {
    let harness = Harness::new(ScriptedProvider::returning(sydney_places()));
    let service = harness.service(config(true, 50), vec![10, 90]);

    let (inside, _) = service
        .search_for_session(Some("inside"), &sydney_query())
        .await
        .expect("answers");
    let (outside, _) = service
        .search_for_session(Some("outside"), &sydney_query())
        .await
        .expect("answers");
    assert_eq!(inside.path, ServePath::Cache);
    assert_eq!(outside.path, ServePath::Legacy);

    service.rollout().replace_config(config(true, 95));
    for _ in 0..3 {
        let (decision, _) = service
            .search_for_session(Some("outside"), &sydney_query())
            .await
            .expect("answers");
        assert_eq!(decision.path, ServePath::Legacy);
        assert_eq!(decision.bucket, 90);
    }

    // The kill switch overrides pinned sessions.
    service.rollout().replace_config(config(false, 95));
    let (killed, _) = service
        .search_for_session(Some("inside"), &sydney_query())
        .await
        .expect("answers");
    assert_eq!(killed.path, ServePath::Legacy);
}

#[tokio::test]
async fn cache_path_with_no_data_and_no_provider_fails() {
    let provider = ScriptedProvider::returning(Vec::new());
    provider.always(Err(ProviderError::Unavailable("down".into())));
    let harness = Harness::new(provider);
    let service = harness.service(config(true, 100), vec![0]);

    let err = service
        .search(&sydney_query(), ServePath::Cache)
        .await
        .expect_err("nothing to serve");
    assert!(matches!(err, SearchError::ProviderUnavailable(_)));
}

/// Store whose reads always time out.
struct BrokenStore;

#[async_trait]
impl PlaceStore for BrokenStore {
    async fn upsert(&self, _record: PlaceRecord) -> Result<UpsertOutcome, RepoError> {
        Err(RepoError::Timeout)
    }

    async fn query_within_radius(
        &self,
        _query: &RadiusQuery,
        _now: OffsetDateTime,
    ) -> Result<RadiusResult, RepoError> {
        Err(RepoError::Timeout)
    }

    async fn get(&self, _external_id: &str) -> Result<Option<PlaceRecord>, RepoError> {
        Err(RepoError::Timeout)
    }

    async fn list_stale(
        &self,
        _older_than: OffsetDateTime,
        _limit: u32,
    ) -> Result<Vec<PlaceRecord>, RepoError> {
        Err(RepoError::Timeout)
    }

    async fn deactivate(&self, _external_id: &str) -> Result<bool, RepoError> {
        Err(RepoError::Timeout)
    }
}

#[tokio::test]
async fn internal_cache_failures_fall_back_to_legacy() {
    let provider = ScriptedProvider::returning(sydney_places());
    let store: Arc<dyn PlaceStore> = Arc::new(BrokenStore);
    let ledger = CallLedger::new(Arc::new(InMemoryCallLedger::new()), UNIT_COST);
    let clock = Arc::new(placecache::application::clock::ManualClock::new(START));
    let policy = CallPolicy::new(StdDuration::from_secs(2));
    let orchestrator = CacheOrchestrator::new(
        store.clone(),
        provider.clone(),
        ledger.clone(),
        clock.clone(),
        policy,
        OrchestratorSettings::default(),
    );
    let rollout = Arc::new(RolloutController::new(
        config(true, 100),
        NonZeroUsize::new(4).expect("non-zero"),
        Arc::new(RandomBuckets),
    ));
    let service = PlaceSearchService::new(
        orchestrator,
        rollout,
        store,
        provider.clone(),
        ledger,
        clock,
        policy,
        30,
    );

    let (decision, outcome) = service
        .search_for_session(Some("session"), &sydney_query())
        .await
        .expect("legacy fallback answers");

    assert_eq!(decision.path, ServePath::Cache);
    assert!(outcome.fell_back);
    assert_eq!(outcome.path, ServePath::Legacy);
    assert_eq!(outcome.source, PlaceSource::Provider);
    assert_eq!(outcome.places.len(), 3);
    assert_eq!(provider.search_calls(), 1);
}

#[tokio::test]
async fn details_are_served_from_cache_when_fresh() {
    let harness = Harness::new(ScriptedProvider::returning(Vec::new()));
    harness
        .store
        .upsert(summary("fresh-one", -33.87, 151.21).into_record(START - Duration::days(1)))
        .await
        .expect("seed");
    let service = harness.service(config(true, 100), vec![0]);

    let outcome = service.details("fresh-one", 30).await.expect("cached");
    assert_eq!(outcome.source, PlaceSource::Cache);
    assert_eq!(harness.provider.detail_calls(), 0);
}

#[tokio::test]
async fn stale_details_are_refetched_and_stored() {
    let harness = Harness::new(ScriptedProvider::returning(Vec::new()));
    harness
        .store
        .upsert(summary("aging", -33.87, 151.21).into_record(START - Duration::days(60)))
        .await
        .expect("seed");
    let mut renamed = summary("aging", -33.87, 151.21);
    renamed.name = Some("Renamed".into());
    harness.provider.set_details("aging", Ok(renamed));
    let service = harness.service(config(true, 100), vec![0]);

    let outcome = service.details("aging", 30).await.expect("refetched");
    assert_eq!(outcome.source, PlaceSource::Provider);
    assert_eq!(outcome.record.name.as_deref(), Some("Renamed"));

    let stored = harness
        .store
        .get("aging")
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(stored.name.as_deref(), Some("Renamed"));
    assert_eq!(stored.last_fetched_at, START);
}

#[tokio::test]
async fn unknown_places_are_deactivated() {
    let harness = Harness::new(ScriptedProvider::returning(Vec::new()));
    harness
        .store
        .upsert(summary("closed", -33.87, 151.21).into_record(START - Duration::days(60)))
        .await
        .expect("seed");
    let service = harness.service(config(true, 100), vec![0]);

    let err = service.details("closed", 30).await.expect_err("gone");
    assert!(matches!(err, SearchError::NotFound(ref id) if id == "closed"));

    let stored = harness
        .store
        .get("closed")
        .await
        .expect("get")
        .expect("kept");
    assert!(!stored.is_active);
}

#[tokio::test]
async fn malformed_place_ids_are_rejected() {
    let harness = Harness::new(ScriptedProvider::returning(Vec::new()));
    let service = harness.service(config(true, 100), vec![0]);

    let err = service
        .details("../../etc/passwd", 30)
        .await
        .expect_err("invalid id");
    assert!(matches!(err, SearchError::InvalidQuery(_)));
    assert_eq!(harness.provider.detail_calls(), 0);
}
