//! Google Places API (New) client: `places:searchNearby` and place details.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    application::provider::{ExternalProvider, ProviderError},
    config::ProviderSettings,
    domain::{geo::GeoPoint, places::PlaceSummary},
    infra::error::InfraError,
};

const TARGET: &str = "placecache::infra::provider::google";

/// Fields requested per place; Google bills by the widest SKU in the mask.
const PLACE_FIELDS: [&str; 11] = [
    "id",
    "displayName",
    "formattedAddress",
    "location",
    "rating",
    "userRatingCount",
    "nationalPhoneNumber",
    "internationalPhoneNumber",
    "websiteUri",
    "businessStatus",
    "currentOpeningHours",
];

/// Google rejects a zero-radius circle.
const MIN_SEARCH_RADIUS_METERS: f64 = 1.0;

pub struct GooglePlacesProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    max_results: u32,
    included_types: Vec<String>,
    region_code: Option<String>,
}

impl GooglePlacesProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, InfraError> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            InfraError::configuration("provider.api_key is required to call the provider")
        })?;

        let base_url = Url::parse(&settings.base_url)
            .map_err(|err| InfraError::configuration(format!("provider.base_url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::configuration(
                "provider.base_url must be a hierarchical URL",
            ));
        }

        let client = Client::builder()
            .user_agent(concat!("placecache/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("provider client: {err}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            max_results: settings.max_results.get(),
            included_types: settings.included_types.clone(),
            region_code: settings.region_code.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidResponse("provider base URL has no path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn field_mask(prefix: &str) -> String {
        PLACE_FIELDS
            .iter()
            .map(|field| format!("{prefix}{field}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[async_trait]
impl ExternalProvider for GooglePlacesProvider {
    async fn search(
        &self,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<Vec<PlaceSummary>, ProviderError> {
        let body = SearchNearbyRequest {
            included_types: &self.included_types,
            max_result_count: self.max_results,
            location_restriction: LocationRestriction {
                circle: Circle {
                    center: LatLng {
                        latitude: center.latitude,
                        longitude: center.longitude,
                    },
                    radius: radius_meters.max(MIN_SEARCH_RADIUS_METERS),
                },
            },
            region_code: self.region_code.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint(&["places:searchNearby"])?)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", Self::field_mask("places."))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response, None).await?;
        let payload: SearchNearbyResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        let total = payload.places.len();
        let places: Vec<PlaceSummary> = payload
            .places
            .into_iter()
            .filter_map(GooglePlace::into_summary)
            .collect();
        debug!(
            target = TARGET,
            returned = total,
            located = places.len(),
            "nearby search completed"
        );
        Ok(places)
    }

    async fn details(&self, external_id: &str) -> Result<PlaceSummary, ProviderError> {
        let response = self
            .client
            .get(self.endpoint(&["places", external_id])?)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", Self::field_mask(""))
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response, Some(external_id)).await?;
        let place: GooglePlace = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

        place.into_summary().ok_or_else(|| {
            ProviderError::InvalidResponse(format!("place `{external_id}` has no location"))
        })
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

async fn check_status(
    response: reqwest::Response,
    external_id: Option<&str>,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("status {status}: {}", truncate(&body, 256));
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::NOT_FOUND => match external_id {
            Some(id) => ProviderError::NotFound(id.to_string()),
            None => ProviderError::InvalidResponse(detail),
        },
        status if status.is_server_error() => ProviderError::Unavailable(detail),
        _ => ProviderError::InvalidResponse(detail),
    })
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchNearbyRequest<'a> {
    #[serde(skip_serializing_if = "no_types")]
    included_types: &'a [String],
    max_result_count: u32,
    location_restriction: LocationRestriction,
    #[serde(skip_serializing_if = "Option::is_none")]
    region_code: Option<&'a str>,
}

fn no_types(types: &&[String]) -> bool {
    types.is_empty()
}

#[derive(Serialize)]
struct LocationRestriction {
    circle: Circle,
}

#[derive(Serialize)]
struct Circle {
    center: LatLng,
    radius: f64,
}

#[derive(Serialize, Deserialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct SearchNearbyResponse {
    #[serde(default)]
    places: Vec<GooglePlace>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePlace {
    id: String,
    display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    location: Option<LatLng>,
    rating: Option<f64>,
    user_rating_count: Option<i64>,
    national_phone_number: Option<String>,
    international_phone_number: Option<String>,
    website_uri: Option<String>,
    business_status: Option<String>,
    current_opening_hours: Option<OpeningHours>,
}

#[derive(Deserialize)]
struct LocalizedText {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpeningHours {
    open_now: Option<bool>,
}

impl GooglePlace {
    /// Places without a usable location cannot participate in radius queries.
    fn into_summary(self) -> Option<PlaceSummary> {
        let location = self.location?;
        let location = GeoPoint::new(location.latitude, location.longitude).ok()?;
        Some(PlaceSummary {
            external_id: self.id,
            name: self.display_name.map(|name| name.text),
            address: self.formatted_address,
            location,
            rating: self.rating,
            review_count: self.user_rating_count,
            phone: self.national_phone_number.or(self.international_phone_number),
            website: self.website_uri,
            business_status: self.business_status,
            open_now: self.current_opening_hours.and_then(|hours| hours.open_now),
        })
    }
}
