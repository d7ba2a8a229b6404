use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use crate::{
    application::repos::{CallLedgerRepo, RepoError},
    domain::ledger::{CallLedgerEntry, LedgerDayTotals},
};

use super::{PostgresRepositories, map_sqlx_error, to_u64};

#[derive(sqlx::FromRow)]
struct DayTotalsRow {
    day: Date,
    total_calls: i64,
    cache_hits: i64,
    provider_calls: i64,
    total_cost: f64,
    total_latency_ms: i64,
}

impl TryFrom<DayTotalsRow> for LedgerDayTotals {
    type Error = RepoError;

    fn try_from(row: DayTotalsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            date: row.day,
            total_calls: to_u64(row.total_calls, "total_calls")?,
            cache_hits: to_u64(row.cache_hits, "cache_hits")?,
            provider_calls: to_u64(row.provider_calls, "provider_calls")?,
            total_cost: row.total_cost,
            total_latency_ms: to_u64(row.total_latency_ms, "total_latency_ms")?,
        })
    }
}

#[async_trait]
impl CallLedgerRepo for PostgresRepositories {
    async fn append(&self, entry: &CallLedgerEntry) -> Result<(), RepoError> {
        let latency_ms = i64::try_from(entry.latency_ms)
            .map_err(|_| RepoError::InvalidInput {
                message: format!("latency `{}` ms is out of range", entry.latency_ms),
            })?;

        sqlx::query(
            "INSERT INTO call_ledger (id, recorded_at, path, operation, cost_estimate, \
                 latency_ms, query_fingerprint, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.recorded_at)
        .bind(entry.path.as_str())
        .bind(entry.operation.as_str())
        .bind(entry.cost_estimate)
        .bind(latency_ms)
        .bind(&entry.query_fingerprint)
        .bind(&entry.error_message)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn daily_totals(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<LedgerDayTotals>, RepoError> {
        let rows: Vec<DayTotalsRow> = sqlx::query_as(
            "SELECT (recorded_at AT TIME ZONE 'UTC')::date AS day, \
                 COUNT(*) AS total_calls, \
                 COUNT(*) FILTER (WHERE path = 'cache_hit') AS cache_hits, \
                 COUNT(*) FILTER (WHERE path = 'provider_call') AS provider_calls, \
                 COALESCE(SUM(cost_estimate), 0)::DOUBLE PRECISION AS total_cost, \
                 COALESCE(SUM(latency_ms), 0)::BIGINT AS total_latency_ms \
             FROM call_ledger \
             WHERE recorded_at >= $1 \
             GROUP BY day \
             ORDER BY day ASC",
        )
        .bind(since)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(LedgerDayTotals::try_from).collect()
    }
}
