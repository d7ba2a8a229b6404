//! Wire types for the placecache HTTP API.
//!
//! Field names follow the camelCase convention of the public query API so
//! that existing UI clients can consume responses without a mapping layer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Where the places in a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceSource {
    Cache,
    Provider,
}

impl PlaceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaceSource::Cache => "cache",
            PlaceSource::Provider => "provider",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: i64,
    #[serde(default)]
    pub max_age_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceView {
    pub external_id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_meters: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub source: PlaceSource,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyResponse {
    pub places: Vec<PlaceView>,
    pub meta: ResponseMeta,
}

/// Detailed view of a single cached place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceDetailView {
    pub external_id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub phone: Option<String>,
    pub website: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_fetched_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDetailResponse {
    pub place: PlaceDetailView,
    pub meta: ResponseMeta,
}

/// Runtime rollout configuration exposed on the admin listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutConfigView {
    pub enabled: bool,
    pub rollout_percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDayView {
    /// Calendar day in `YYYY-MM-DD` form (UTC).
    pub date: String,
    pub total_calls: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub total_cost: f64,
    pub avoided_cost: f64,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummaryResponse {
    pub days: Vec<LedgerDayView>,
    pub total_calls: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub total_cost: f64,
    pub avoided_cost: f64,
    pub cache_hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_request_accepts_camel_case_without_max_age() {
        let request: NearbyRequest = serde_json::from_str(
            r#"{"latitude":-33.8688,"longitude":151.2093,"radiusMeters":5000}"#,
        )
        .expect("request parses");

        assert_eq!(request.radius_meters, 5000);
        assert_eq!(request.max_age_days, None);
    }

    #[test]
    fn place_view_omits_absent_optionals() {
        let view = PlaceView {
            external_id: "abc".to_string(),
            name: Some("Lakemba Mosque".to_string()),
            address: None,
            latitude: -33.92,
            longitude: 151.07,
            distance_meters: 12.5,
            rating: None,
            review_count: None,
            phone: None,
            website: None,
        };

        let json = serde_json::to_value(&view).expect("serializes");
        assert_eq!(json["externalId"], "abc");
        assert!(json.get("rating").is_none());
        assert!(json.get("website").is_none());
    }

    #[test]
    fn source_serializes_lowercase() {
        let meta = ResponseMeta {
            source: PlaceSource::Provider,
            latency_ms: 42,
        };
        let json = serde_json::to_value(meta).expect("serializes");
        assert_eq!(json["source"], "provider");
        assert_eq!(json["latencyMs"], 42);
    }
}
