use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use placecache_api_types::{LedgerDayView, LedgerSummaryResponse};
use serde::Deserialize;

use crate::{application::error::HttpError, domain::ledger::LedgerReport};

use super::AdminState;

const SOURCE: &str = "infra::http::admin_ledger";
const DEFAULT_DAYS: u32 = 7;
const MAX_DAYS: u32 = 366;

#[derive(Debug, Deserialize)]
pub(super) struct LedgerSummaryQuery {
    days: Option<u32>,
}

pub fn summary_response(report: LedgerReport) -> LedgerSummaryResponse {
    LedgerSummaryResponse {
        days: report
            .days
            .into_iter()
            .map(|day| LedgerDayView {
                date: day.totals.date.to_string(),
                total_calls: day.totals.total_calls,
                cache_hits: day.totals.cache_hits,
                provider_calls: day.totals.provider_calls,
                total_cost: day.totals.total_cost,
                avoided_cost: day.avoided_cost,
                cache_hit_rate: day.cache_hit_rate,
                avg_latency_ms: day.avg_latency_ms,
            })
            .collect(),
        total_calls: report.total_calls,
        cache_hits: report.cache_hits,
        provider_calls: report.provider_calls,
        total_cost: report.total_cost,
        avoided_cost: report.avoided_cost,
        cache_hit_rate: report.cache_hit_rate,
    }
}

pub(super) async fn admin_ledger_summary(
    State(state): State<AdminState>,
    query: Result<Query<LedgerSummaryQuery>, QueryRejection>,
) -> Response {
    let days = match query {
        Ok(Query(query)) => query.days.unwrap_or(DEFAULT_DAYS),
        Err(rejection) => {
            return HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid days parameter",
                rejection.body_text(),
            )
            .into_response();
        }
    };
    if !(1..=MAX_DAYS).contains(&days) {
        return HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid days parameter",
            format!("days `{days}` must be within [1, {MAX_DAYS}]"),
        )
        .into_response();
    }

    match state.ledger.summarize(days, state.clock.now()).await {
        Ok(report) => Json(summary_response(report)).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}
