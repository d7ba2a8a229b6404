use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use placecache_api_types::{
    NearbyRequest, NearbyResponse, PlaceDetailResponse, ResponseMeta,
};
use tracing::debug;

use crate::application::search::SearchError;
use crate::domain::query::NearbyQuery;
use crate::infra::http::middleware::SESSION_HEADER;

use super::error::ApiError;
use super::models::{DetailQuery, place_detail_view, place_view};
use super::state::ApiState;

/// Response header naming the path that answered a nearby query.
pub const SERVE_PATH_HEADER: &str = "x-placecache-path";

pub async fn nearby_post(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<NearbyRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => nearby(&state, &headers, request).await,
        Err(rejection) => {
            ApiError::bad_request("Malformed request body", Some(rejection.body_text()))
                .into_response()
        }
    }
}

pub async fn nearby_get(
    State(state): State<ApiState>,
    headers: HeaderMap,
    params: Result<Query<NearbyRequest>, QueryRejection>,
) -> Response {
    match params {
        Ok(Query(request)) => nearby(&state, &headers, request).await,
        Err(rejection) => {
            ApiError::bad_request("Malformed query string", Some(rejection.body_text()))
                .into_response()
        }
    }
}

async fn nearby(state: &ApiState, headers: &HeaderMap, request: NearbyRequest) -> Response {
    let max_age_days = request
        .max_age_days
        .unwrap_or_else(|| i64::from(state.search.default_max_age_days()));
    let query = match NearbyQuery::new(
        request.latitude,
        request.longitude,
        request.radius_meters,
        max_age_days,
    ) {
        Ok(query) => query,
        Err(err) => return ApiError::from(SearchError::from(err)).into_response(),
    };

    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.search.search_for_session(session_id, &query).await {
        Ok((decision, outcome)) => {
            debug!(
                target = "placecache::http::api::nearby",
                session_id = %decision.session_id,
                bucket = decision.bucket,
                path = outcome.path.as_str(),
                source = outcome.source.as_str(),
                places = outcome.places.len(),
                "nearby query answered"
            );
            let body = NearbyResponse {
                places: outcome.places.iter().map(place_view).collect(),
                meta: ResponseMeta {
                    source: outcome.source,
                    latency_ms: outcome.latency_ms,
                },
            };
            let mut response = Json(body).into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&decision.session_id) {
                headers.insert(SESSION_HEADER, value);
            }
            headers.insert(
                SERVE_PATH_HEADER,
                HeaderValue::from_static(outcome.path.as_str()),
            );
            response
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub async fn place_details(
    State(state): State<ApiState>,
    Path(external_id): Path<String>,
    params: Result<Query<DetailQuery>, QueryRejection>,
) -> Response {
    let max_age_days = match params {
        Ok(Query(params)) => params
            .max_age_days
            .unwrap_or_else(|| state.search.default_max_age_days()),
        Err(rejection) => {
            return ApiError::bad_request("Malformed query string", Some(rejection.body_text()))
                .into_response();
        }
    };

    match state.search.details(&external_id, max_age_days).await {
        Ok(outcome) => Json(PlaceDetailResponse {
            place: place_detail_view(outcome.record),
            meta: ResponseMeta {
                source: outcome.source,
                latency_ms: outcome.latency_ms,
            },
        })
        .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
