//! Geodesic helpers: haversine distance and radius bounding boxes.

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Mean Earth radius (IUGG) in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Padding applied to bounding boxes so points sitting exactly on the
/// boundary survive floating point rounding in the pre-filter.
const BBOX_PADDING_DEGREES: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, DomainError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(DomainError::invalid_query(format!(
                "latitude `{latitude}` must be within [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(DomainError::invalid_query(format!(
                "longitude `{longitude}` must be within [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_meters(self, other)
    }
}

/// Great-circle distance between two points in meters.
pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_METERS * c
}

/// Latitude/longitude rectangle enclosing every point within a radius.
///
/// When the circle crosses the antimeridian, `min_longitude > max_longitude`
/// and [`BoundingBox::longitude_ranges`] yields two segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    pub fn around(center: &GeoPoint, radius_meters: f64) -> Self {
        let angular = radius_meters.max(0.0) / EARTH_RADIUS_METERS;
        let lat = center.latitude.to_radians();
        let lng = center.longitude.to_radians();

        let mut min_lat = lat - angular;
        let mut max_lat = lat + angular;
        let half_pi = std::f64::consts::FRAC_PI_2;
        let pi = std::f64::consts::PI;

        let (min_lng, max_lng) = if min_lat > -half_pi && max_lat < half_pi {
            let delta = (angular.sin() / lat.cos()).clamp(-1.0, 1.0).asin();
            let mut min_lng = lng - delta;
            let mut max_lng = lng + delta;
            if min_lng < -pi {
                min_lng += 2.0 * pi;
            }
            if max_lng > pi {
                max_lng -= 2.0 * pi;
            }
            (min_lng, max_lng)
        } else {
            // A pole lies inside the circle: every longitude qualifies.
            min_lat = min_lat.max(-half_pi);
            max_lat = max_lat.min(half_pi);
            (-pi, pi)
        };

        Self {
            min_latitude: (min_lat.to_degrees() - BBOX_PADDING_DEGREES).max(-90.0),
            max_latitude: (max_lat.to_degrees() + BBOX_PADDING_DEGREES).min(90.0),
            min_longitude: (min_lng.to_degrees() - BBOX_PADDING_DEGREES).max(-180.0),
            max_longitude: (max_lng.to_degrees() + BBOX_PADDING_DEGREES).min(180.0),
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.min_longitude > self.max_longitude
    }

    /// Contiguous longitude segments covered by the box.
    pub fn longitude_ranges(&self) -> Vec<(f64, f64)> {
        if self.crosses_antimeridian() {
            vec![(self.min_longitude, 180.0), (-180.0, self.max_longitude)]
        } else {
            vec![(self.min_longitude, self.max_longitude)]
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.latitude < self.min_latitude || point.latitude > self.max_latitude {
            return false;
        }
        self.longitude_ranges()
            .iter()
            .any(|(min, max)| point.longitude >= *min && point.longitude <= *max)
    }
}
