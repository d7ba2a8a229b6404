use std::sync::Arc;

use crate::application::search::PlaceSearchService;

use super::rate_limit::ApiRateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub search: Arc<PlaceSearchService>,
    pub rate_limiter: Arc<ApiRateLimiter>,
}
