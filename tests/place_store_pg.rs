mod support;

use std::collections::HashSet;

use placecache::application::repos::{CallLedgerRepo, PlaceStore};
use placecache::domain::geo::GeoPoint;
use placecache::domain::ledger::{CallLedgerEntry, CallOperation};
use placecache::domain::places::{RadiusQuery, UpsertOutcome};
use placecache::infra::db::PostgresRepositories;
use sqlx::PgPool;
use time::Duration;

use support::{START, UNIT_COST, summary, sydney_places};

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn place_indexes_exist(pool: PgPool) {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT indexname FROM pg_indexes WHERE schemaname = 'public' AND tablename = 'places'",
    )
    .fetch_all(&pool)
    .await
    .expect("fetch place indexes");

    let indexes: HashSet<String> = rows.into_iter().collect();
    assert!(
        indexes.contains("places_active_location_idx"),
        "missing places_active_location_idx"
    );
    assert!(
        indexes.contains("places_active_fetched_idx"),
        "missing places_active_fetched_idx"
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn upsert_keeps_the_newest_fetch(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let mut newer = summary("ordering", -33.87, 151.21);
    newer.name = Some("new".into());
    let mut older = summary("ordering", -33.87, 151.21);
    older.name = Some("old".into());

    assert_eq!(
        repos
            .upsert(newer.into_record(START + Duration::hours(6)))
            .await
            .expect("insert"),
        UpsertOutcome::Inserted
    );
    assert_eq!(
        repos
            .upsert(older.into_record(START))
            .await
            .expect("stale write"),
        UpsertOutcome::RejectedStale
    );

    let mut newest = summary("ordering", -33.87, 151.21);
    newest.name = Some("newest".into());
    assert_eq!(
        repos
            .upsert(newest.into_record(START + Duration::days(1)))
            .await
            .expect("update"),
        UpsertOutcome::Updated
    );

    let stored = repos.get("ordering").await.expect("get").expect("stored");
    assert_eq!(stored.name.as_deref(), Some("newest"));
    assert_eq!(stored.last_fetched_at, START + Duration::days(1));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn radius_queries_partition_by_freshness(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let mut places = sydney_places().into_iter();
    let fresh = places.next().expect("place");
    let stale = places.next().expect("place");
    repos
        .upsert(fresh.into_record(START - Duration::days(1)))
        .await
        .expect("seed");
    repos
        .upsert(stale.into_record(START - Duration::days(60)))
        .await
        .expect("seed");
    repos
        .upsert(summary("parramatta", -33.8150, 151.0011).into_record(START))
        .await
        .expect("seed");
    repos
        .upsert(summary("closed", -33.8700, 151.2100).into_record(START))
        .await
        .expect("seed");
    assert!(repos.deactivate("closed").await.expect("deactivate"));
    assert!(!repos.deactivate("closed").await.expect("already inactive"));

    let query = RadiusQuery {
        center: GeoPoint::new(-33.8688, 151.2093).expect("valid"),
        radius_meters: 5_000.0,
        max_age_days: 30,
    };
    let result = repos
        .query_within_radius(&query, START)
        .await
        .expect("radius query");

    assert_eq!(result.fresh.len(), 1);
    assert_eq!(result.stale.len(), 1);
    let ids: Vec<&str> = result
        .fresh
        .iter()
        .chain(&result.stale)
        .map(|place| place.record.external_id.as_str())
        .collect();
    assert!(!ids.contains(&"parramatta"));
    assert!(!ids.contains(&"closed"));

    let stale_list = repos
        .list_stale(START - Duration::days(7), 10)
        .await
        .expect("list stale");
    assert_eq!(stale_list.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs DATABASE_URL"]
async fn ledger_totals_group_by_day(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let yesterday = START - Duration::days(1);
    let entries = [
        CallLedgerEntry::provider_call(CallOperation::Search, "fp-a", UNIT_COST, 120, yesterday),
        CallLedgerEntry::cache_hit(CallOperation::Search, "fp-a", 4, START),
        CallLedgerEntry::cache_hit(CallOperation::Search, "fp-a", 6, START),
        CallLedgerEntry::provider_call(CallOperation::Refresh, "place-x", UNIT_COST, 80, START)
            .with_error("status 503"),
    ];
    for entry in &entries {
        repos.append(entry).await.expect("append");
    }

    let days = repos
        .daily_totals(START - Duration::days(7))
        .await
        .expect("totals");

    assert_eq!(days.len(), 2);
    assert_eq!(days[0].date, yesterday.date());
    assert_eq!(days[0].provider_calls, 1);
    assert_eq!(days[1].date, START.date());
    assert_eq!(days[1].total_calls, 3);
    assert_eq!(days[1].cache_hits, 2);
    assert_eq!(days[1].total_latency_ms, 90);
    assert!((days[1].total_cost - UNIT_COST).abs() < 1e-9);
}
