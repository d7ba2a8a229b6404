//! Place records, provider summaries, and radius query results.

use std::cmp::Ordering;

use time::{Duration, OffsetDateTime};

use super::geo::GeoPoint;

/// One persisted place, keyed by the provider-assigned `external_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    pub external_id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub location: Option<GeoPoint>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub business_status: Option<String>,
    pub open_now: Option<bool>,
    pub last_fetched_at: OffsetDateTime,
    pub is_active: bool,
}

impl PlaceRecord {
    /// Whether the record was fetched within `max_age_days` of `now`.
    pub fn is_fresh(&self, max_age_days: u32, now: OffsetDateTime) -> bool {
        now - self.last_fetched_at <= Duration::days(i64::from(max_age_days))
    }

    /// Compare the provider-sourced fields against a newer summary.
    pub fn provider_fields_differ(&self, summary: &PlaceSummary) -> bool {
        self.name != summary.name
            || self.address != summary.address
            || self.phone != summary.phone
            || self.website != summary.website
            || self.rating != summary.rating
            || self.review_count != summary.review_count
            || self.business_status != summary.business_status
            || self.open_now != summary.open_now
    }
}

/// Provider-sourced subset of a [`PlaceRecord`]; always located.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceSummary {
    pub external_id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub location: GeoPoint,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub business_status: Option<String>,
    pub open_now: Option<bool>,
}

impl PlaceSummary {
    pub fn into_record(self, fetched_at: OffsetDateTime) -> PlaceRecord {
        let parts = self
            .address
            .as_deref()
            .map(AddressParts::parse)
            .unwrap_or_default();

        PlaceRecord {
            external_id: self.external_id,
            name: self.name,
            address: self.address,
            suburb: parts.suburb,
            state: parts.state,
            postcode: parts.postcode,
            location: Some(self.location),
            rating: self.rating,
            review_count: self.review_count,
            phone: self.phone,
            website: self.website,
            business_status: self.business_status,
            open_now: self.open_now,
            last_fetched_at: fetched_at,
            is_active: true,
        }
    }
}

/// Locality fields derived from a formatted address such as
/// `"1 Haldon St, Lakemba, NSW 2195, Australia"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub suburb: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
}

impl AddressParts {
    pub fn parse(address: &str) -> Self {
        let parts: Vec<&str> = address.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return Self::default();
        }

        let suburb = Some(parts[parts.len() - 3])
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let (state, postcode) = match state_and_postcode(parts[parts.len() - 2]) {
            Some((state, postcode)) => (Some(state), Some(postcode)),
            None => (None, None),
        };

        Self {
            suburb,
            state,
            postcode,
        }
    }
}

/// Find the first `<UPPERCASE> <4 digits>` pair, e.g. `NSW 2195`.
fn state_and_postcode(segment: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = segment.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        let state: String = {
            let tail: Vec<char> = pair[0]
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_uppercase())
                .collect();
            tail.into_iter().rev().collect()
        };
        let digits: String = pair[1].chars().take(4).collect();
        let valid = !state.is_empty()
            && digits.len() == 4
            && digits.chars().all(|c| c.is_ascii_digit());
        valid.then_some((state, digits))
    })
}

/// Outcome of a freshness-guarded upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Stored copy is at least as fresh; nothing was written.
    RejectedStale,
}

impl UpsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::RejectedStale => "rejected_stale",
        }
    }

    /// Decide the outcome of writing `incoming` over an optional stored timestamp.
    pub fn decide(stored: Option<OffsetDateTime>, incoming: OffsetDateTime) -> Self {
        match stored {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing < incoming => UpsertOutcome::Updated,
            Some(_) => UpsertOutcome::RejectedStale,
        }
    }
}

/// A located record annotated with its distance from the query point.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPlace {
    pub record: PlaceRecord,
    pub location: GeoPoint,
    pub distance_meters: f64,
}

/// Radius query inputs shared by every store implementation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusQuery {
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub max_age_days: u32,
}

/// Places within a radius, split by freshness and ordered by distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadiusResult {
    pub fresh: Vec<RankedPlace>,
    pub stale: Vec<RankedPlace>,
}

impl RadiusResult {
    /// Refine bounding-box candidates into an ordered, partitioned result.
    ///
    /// Inactive and unlocated records are dropped; survivors must lie within
    /// the exact haversine radius.
    pub fn from_candidates<I>(candidates: I, query: &RadiusQuery, now: OffsetDateTime) -> Self
    where
        I: IntoIterator<Item = PlaceRecord>,
    {
        let mut fresh = Vec::new();
        let mut stale = Vec::new();

        for record in candidates {
            if !record.is_active {
                continue;
            }
            let Some(location) = record.location else {
                continue;
            };
            let distance_meters = query.center.distance_to(&location);
            if distance_meters > query.radius_meters {
                continue;
            }
            let is_fresh = record.is_fresh(query.max_age_days, now);
            let ranked = RankedPlace {
                record,
                location,
                distance_meters,
            };
            if is_fresh {
                fresh.push(ranked);
            } else {
                stale.push(ranked);
            }
        }

        sort_by_distance(&mut fresh);
        sort_by_distance(&mut stale);
        Self { fresh, stale }
    }

    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty() && self.stale.is_empty()
    }
}

/// Order by distance ascending, ties broken by `external_id`.
pub fn sort_by_distance(places: &mut [RankedPlace]) {
    places.sort_by(|a, b| {
        a.distance_meters
            .partial_cmp(&b.distance_meters)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.external_id.cmp(&b.record.external_id))
    });
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn record(id: &str, lat: f64, lng: f64, fetched_at: OffsetDateTime) -> PlaceRecord {
        PlaceSummary {
            external_id: id.to_string(),
            name: Some(format!("Place {id}")),
            address: None,
            location: GeoPoint::new(lat, lng).expect("valid point"),
            rating: None,
            review_count: None,
            phone: None,
            website: None,
            business_status: None,
            open_now: None,
        }
        .into_record(fetched_at)
    }

    #[test]
    fn parses_state_and_postcode_from_formatted_address() {
        let parts = AddressParts::parse("Lakemba, NSW 2195, Australia");
        assert_eq!(parts.suburb.as_deref(), Some("Lakemba"));
        assert_eq!(parts.state.as_deref(), Some("NSW"));
        assert_eq!(parts.postcode.as_deref(), Some("2195"));

        let parts = AddressParts::parse("71-75 Wangee Rd, Lakemba NSW 2195, Australia");
        assert_eq!(parts.suburb.as_deref(), Some("71-75 Wangee Rd"));
        assert_eq!(parts.state.as_deref(), Some("NSW"));
        assert_eq!(parts.postcode.as_deref(), Some("2195"));
    }

    #[test]
    fn short_addresses_yield_no_parts() {
        assert_eq!(AddressParts::parse("Australia"), AddressParts::default());
        let parts = AddressParts::parse("Somewhere, nowhere 12, Australia");
        assert_eq!(parts.suburb.as_deref(), Some("Somewhere"));
        assert_eq!(parts.state, None);
        assert_eq!(parts.postcode, None);
    }

    #[test]
    fn upsert_outcome_respects_freshness_ordering() {
        let t1 = datetime!(2026-01-01 00:00 UTC);
        let t2 = datetime!(2026-01-02 00:00 UTC);
        assert_eq!(UpsertOutcome::decide(None, t1), UpsertOutcome::Inserted);
        assert_eq!(UpsertOutcome::decide(Some(t1), t2), UpsertOutcome::Updated);
        assert_eq!(
            UpsertOutcome::decide(Some(t2), t1),
            UpsertOutcome::RejectedStale
        );
        assert_eq!(
            UpsertOutcome::decide(Some(t1), t1),
            UpsertOutcome::RejectedStale
        );
    }

    #[test]
    fn radius_result_partitions_and_orders() {
        let now = datetime!(2026-03-01 00:00 UTC);
        let old = now - Duration::days(45);
        let center = GeoPoint::new(-33.8688, 151.2093).expect("valid point");
        let query = RadiusQuery {
            center,
            radius_meters: 5_000.0,
            max_age_days: 30,
        };

        let mut inactive = record("inactive", -33.8690, 151.2090, now);
        inactive.is_active = false;
        let mut unlocated = record("unlocated", -33.8690, 151.2090, now);
        unlocated.location = None;

        let result = RadiusResult::from_candidates(
            vec![
                record("far", -33.8900, 151.2093, now),
                record("near", -33.8690, 151.2095, now),
                record("stale", -33.8700, 151.2093, old),
                record("outside", -34.5000, 151.2093, now),
                inactive,
                unlocated,
            ],
            &query,
            now,
        );

        let fresh: Vec<_> = result
            .fresh
            .iter()
            .map(|p| p.record.external_id.as_str())
            .collect();
        assert_eq!(fresh, vec!["near", "far"]);
        assert_eq!(result.stale.len(), 1);
        assert_eq!(result.stale[0].record.external_id, "stale");
    }

    #[test]
    fn equal_distances_tie_break_on_external_id() {
        let now = datetime!(2026-03-01 00:00 UTC);
        let query = RadiusQuery {
            center: GeoPoint::new(-27.4698, 153.0251).expect("valid point"),
            radius_meters: 0.0,
            max_age_days: 30,
        };

        let result = RadiusResult::from_candidates(
            vec![
                record("b", -27.4698, 153.0251, now),
                record("a", -27.4698, 153.0251, now),
            ],
            &query,
            now,
        );

        let ids: Vec<_> = result
            .fresh
            .iter()
            .map(|p| p.record.external_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn provider_field_changes_are_detected() {
        let now = datetime!(2026-03-01 00:00 UTC);
        let stored = record("x", -33.0, 151.0, now);
        let mut summary = PlaceSummary {
            external_id: "x".to_string(),
            name: stored.name.clone(),
            address: None,
            location: GeoPoint::new(-33.0, 151.0).expect("valid point"),
            rating: None,
            review_count: None,
            phone: None,
            website: None,
            business_status: None,
            open_now: None,
        };
        assert!(!stored.provider_fields_differ(&summary));

        summary.rating = Some(4.7);
        assert!(stored.provider_fields_differ(&summary));
    }
}
