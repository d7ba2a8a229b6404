//! External place provider abstraction and its call policy.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::domain::{geo::GeoPoint, places::PlaceSummary};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure, 5xx, or timeout.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    #[error("provider response could not be interpreted: {0}")]
    InvalidResponse(String),
    #[error("place `{0}` is unknown to the provider")]
    NotFound(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::NotFound(_) => "not_found",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

/// A paid third-party nearby-search API.
#[async_trait]
pub trait ExternalProvider: Send + Sync {
    async fn search(
        &self,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<Vec<PlaceSummary>, ProviderError>;

    async fn details(&self, external_id: &str) -> Result<PlaceSummary, ProviderError>;
}

/// Result of a policed provider call along with how many billable attempts it took.
#[derive(Debug)]
pub struct ProviderAttempt<T> {
    pub result: Result<T, ProviderError>,
    pub attempts: u32,
}

/// Timeout and retry rules applied around every provider call.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    timeout: Duration,
    max_retries: u32,
}

impl CallPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 1,
        }
    }

    /// Run `call` under the timeout, retrying `Unavailable` failures once.
    /// Rate limiting is never retried.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> ProviderAttempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            counter!("placecache_provider_call_total", "operation" => operation).increment(1);

            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Unavailable(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(value) => {
                    return ProviderAttempt {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(err) => err,
            };

            counter!("placecache_provider_error_total", "kind" => err.kind()).increment(1);
            if matches!(err, ProviderError::RateLimited(_)) {
                warn!(
                    target = "placecache::application::provider",
                    operation,
                    error = %err,
                    "provider rate limited the request; not retrying"
                );
            }

            if err.is_retryable() && attempts <= self.max_retries {
                warn!(
                    target = "placecache::application::provider",
                    operation,
                    attempt = attempts,
                    error = %err,
                    "provider call failed; retrying"
                );
                continue;
            }

            return ProviderAttempt {
                result: Err(err),
                attempts,
            };
        }
    }
}
