//! Call ledger entries and the daily cost report derived from them.

use std::collections::BTreeMap;

use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPath {
    CacheHit,
    ProviderCall,
}

impl CallPath {
    pub fn as_str(self) -> &'static str {
        match self {
            CallPath::CacheHit => "cache_hit",
            CallPath::ProviderCall => "provider_call",
        }
    }

}

/// Which operation produced the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOperation {
    Search,
    LegacySearch,
    Details,
    Refresh,
}

impl CallOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            CallOperation::Search => "search",
            CallOperation::LegacySearch => "legacy_search",
            CallOperation::Details => "details",
            CallOperation::Refresh => "refresh",
        }
    }

}

#[derive(Debug, Clone, PartialEq)]
pub struct CallLedgerEntry {
    pub id: Uuid,
    pub recorded_at: OffsetDateTime,
    pub path: CallPath,
    pub operation: CallOperation,
    pub cost_estimate: f64,
    pub latency_ms: u64,
    pub query_fingerprint: String,
    pub error_message: Option<String>,
}

impl CallLedgerEntry {
    pub fn cache_hit(
        operation: CallOperation,
        query_fingerprint: impl Into<String>,
        latency_ms: u64,
        recorded_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at,
            path: CallPath::CacheHit,
            operation,
            cost_estimate: 0.0,
            latency_ms,
            query_fingerprint: query_fingerprint.into(),
            error_message: None,
        }
    }

    /// A billable provider call; failed calls are still charged.
    pub fn provider_call(
        operation: CallOperation,
        query_fingerprint: impl Into<String>,
        unit_cost: f64,
        latency_ms: u64,
        recorded_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at,
            path: CallPath::ProviderCall,
            operation,
            cost_estimate: unit_cost,
            latency_ms,
            query_fingerprint: query_fingerprint.into(),
            error_message: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Raw per-day aggregates as produced by a ledger store.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerDayTotals {
    pub date: Date,
    pub total_calls: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub total_cost: f64,
    pub total_latency_ms: u64,
}

impl LedgerDayTotals {
    fn empty(date: Date) -> Self {
        Self {
            date,
            total_calls: 0,
            cache_hits: 0,
            provider_calls: 0,
            total_cost: 0.0,
            total_latency_ms: 0,
        }
    }

    /// Fold raw entries into per-day totals ordered by date.
    pub fn aggregate<'a, I>(entries: I) -> Vec<Self>
    where
        I: IntoIterator<Item = &'a CallLedgerEntry>,
    {
        let mut days: BTreeMap<Date, LedgerDayTotals> = BTreeMap::new();
        for entry in entries {
            let date = entry.recorded_at.date();
            let day = days
                .entry(date)
                .or_insert_with(|| LedgerDayTotals::empty(date));
            day.total_calls += 1;
            match entry.path {
                CallPath::CacheHit => day.cache_hits += 1,
                CallPath::ProviderCall => day.provider_calls += 1,
            }
            day.total_cost += entry.cost_estimate;
            day.total_latency_ms += entry.latency_ms;
        }
        days.into_values().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerDayReport {
    pub totals: LedgerDayTotals,
    pub avoided_cost: f64,
    /// Percentage of calls answered from cache, 0 when there were no calls.
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReport {
    pub days: Vec<LedgerDayReport>,
    pub total_calls: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub total_cost: f64,
    pub avoided_cost: f64,
    pub cache_hit_rate: f64,
}

impl LedgerReport {
    /// Derive savings and hit rates; every cache hit avoided one `unit_cost` call.
    pub fn from_days(days: Vec<LedgerDayTotals>, unit_cost: f64) -> Self {
        let mut total_calls = 0;
        let mut cache_hits = 0;
        let mut provider_calls = 0;
        let mut total_cost = 0.0;

        let days: Vec<LedgerDayReport> = days
            .into_iter()
            .map(|totals| {
                total_calls += totals.total_calls;
                cache_hits += totals.cache_hits;
                provider_calls += totals.provider_calls;
                total_cost += totals.total_cost;

                let avg_latency_ms = if totals.total_calls == 0 {
                    0.0
                } else {
                    totals.total_latency_ms as f64 / totals.total_calls as f64
                };
                LedgerDayReport {
                    avoided_cost: totals.cache_hits as f64 * unit_cost,
                    cache_hit_rate: hit_rate(totals.cache_hits, totals.total_calls),
                    avg_latency_ms,
                    totals,
                }
            })
            .collect();

        Self {
            days,
            total_calls,
            cache_hits,
            provider_calls,
            total_cost,
            avoided_cost: cache_hits as f64 * unit_cost,
            cache_hit_rate: hit_rate(cache_hits, total_calls),
        }
    }
}

fn hit_rate(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn aggregates_entries_per_day() {
        let entries = vec![
            CallLedgerEntry::cache_hit(
                CallOperation::Search,
                "a",
                4,
                datetime!(2026-05-01 08:00 UTC),
            ),
            CallLedgerEntry::provider_call(
                CallOperation::Search,
                "b",
                0.032,
                300,
                datetime!(2026-05-01 09:00 UTC),
            ),
            CallLedgerEntry::cache_hit(
                CallOperation::Search,
                "a",
                6,
                datetime!(2026-05-02 10:00 UTC),
            ),
        ];

        let days = LedgerDayTotals::aggregate(&entries);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].total_calls, 2);
        assert_eq!(days[0].cache_hits, 1);
        assert_eq!(days[0].provider_calls, 1);
        assert_eq!(days[0].total_latency_ms, 304);
        assert_eq!(days[1].cache_hits, 1);

        let report = LedgerReport::from_days(days, 0.032);
        assert_eq!(report.total_calls, 3);
        assert_eq!(report.cache_hits, 2);
        assert!((report.avoided_cost - 0.064).abs() < 1e-9);
        assert!((report.total_cost - 0.032).abs() < 1e-9);
        assert!((report.cache_hit_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((report.days[0].avg_latency_ms - 152.0).abs() < 1e-9);
        assert!((report.days[1].cache_hit_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_report_has_zero_rates() {
        let report = LedgerReport::from_days(Vec::new(), 0.032);
        assert_eq!(report.total_calls, 0);
        assert_eq!(report.cache_hit_rate, 0.0);
        assert!(report.days.is_empty());
    }
}
