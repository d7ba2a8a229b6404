use placecache_api_types::{PlaceDetailView, PlaceView};
use serde::Deserialize;

use crate::domain::places::{PlaceRecord, RankedPlace};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailQuery {
    pub max_age_days: Option<u32>,
}

pub fn place_view(place: &RankedPlace) -> PlaceView {
    let record = &place.record;
    PlaceView {
        external_id: record.external_id.clone(),
        name: record.name.clone(),
        address: record.address.clone(),
        latitude: place.location.latitude,
        longitude: place.location.longitude,
        distance_meters: place.distance_meters,
        rating: record.rating,
        review_count: record.review_count,
        phone: record.phone.clone(),
        website: record.website.clone(),
    }
}

pub fn place_detail_view(record: PlaceRecord) -> PlaceDetailView {
    PlaceDetailView {
        latitude: record.location.map(|point| point.latitude),
        longitude: record.location.map(|point| point.longitude),
        external_id: record.external_id,
        name: record.name,
        address: record.address,
        suburb: record.suburb,
        state: record.state,
        postcode: record.postcode,
        rating: record.rating,
        review_count: record.review_count,
        phone: record.phone,
        website: record.website,
        last_fetched_at: record.last_fetched_at,
    }
}
