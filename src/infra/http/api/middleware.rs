use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath, State};
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::error::ApiError;
use super::state::ApiState;

const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Client identity for rate limiting: the peer address when the server
/// exposes it, otherwise a single shared bucket.
fn client_key(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let client = client_key(&request);

    let decision = state.rate_limiter.check(&client, &route);
    if !decision.allowed {
        debug!(
            target = "placecache::http::api::rate_limit",
            client = %client,
            route = %route,
            limit = state.rate_limiter.limit(),
            "request rejected by rate limiter"
        );
        return ApiError::rate_limited(state.rate_limiter.retry_after_secs());
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        REMAINING_HEADER,
        HeaderValue::from(decision.remaining),
    );
    response
}
