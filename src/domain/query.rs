//! Validated nearby queries and their coalescing fingerprints.

use sha2::{Digest, Sha256};

use super::{error::DomainError, geo::GeoPoint, places::RadiusQuery};

/// Largest radius accepted from callers, in meters.
pub const MAX_RADIUS_METERS: i64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyQuery {
    pub center: GeoPoint,
    pub radius_meters: i64,
    pub max_age_days: u32,
}

impl NearbyQuery {
    pub fn new(
        latitude: f64,
        longitude: f64,
        radius_meters: i64,
        max_age_days: i64,
    ) -> Result<Self, DomainError> {
        let center = GeoPoint::new(latitude, longitude)?;

        if !(0..=MAX_RADIUS_METERS).contains(&radius_meters) {
            return Err(DomainError::invalid_query(format!(
                "radiusMeters `{radius_meters}` must be within [0, {MAX_RADIUS_METERS}]"
            )));
        }

        let max_age_days = u32::try_from(max_age_days).map_err(|_| {
            DomainError::invalid_query(format!(
                "maxAgeDays `{max_age_days}` must be a non-negative day count"
            ))
        })?;

        Ok(Self {
            center,
            radius_meters,
            max_age_days,
        })
    }

    pub fn radius_query(&self) -> RadiusQuery {
        RadiusQuery {
            center: self.center,
            radius_meters: self.radius_meters as f64,
            max_age_days: self.max_age_days,
        }
    }

    /// Normalized key: coordinates rounded to `precision` decimals plus radius.
    ///
    /// The freshness window is not part of the key; every waiter re-reads the
    /// store with its own window once the shared provider call settles.
    pub fn normalized_key(&self, precision: u32) -> String {
        let lat = round_to(self.center.latitude, precision);
        let lng = round_to(self.center.longitude, precision);
        let digits = precision as usize;
        format!("{lat:.digits$},{lng:.digits$},{}", self.radius_meters)
    }

    /// Stable hex digest of [`NearbyQuery::normalized_key`].
    pub fn fingerprint(&self, precision: u32) -> QueryFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_key(precision).as_bytes());
        QueryFingerprint(hex::encode(hasher.finalize()))
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    // Adding zero folds `-0.0` into `0.0` so both hemispheres share a key.
    (value * factor).round() / factor + 0.0
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
