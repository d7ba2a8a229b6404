//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::{
    ledger::{CallLedgerEntry, LedgerDayTotals},
    places::{PlaceRecord, RadiusQuery, RadiusResult, UpsertOutcome},
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

/// Geospatially indexed place storage shared by every request.
#[async_trait]
pub trait PlaceStore: Send + Sync {
    /// Insert or update keyed by `external_id`; older `last_fetched_at` loses.
    async fn upsert(&self, record: PlaceRecord) -> Result<UpsertOutcome, RepoError>;

    async fn query_within_radius(
        &self,
        query: &RadiusQuery,
        now: OffsetDateTime,
    ) -> Result<RadiusResult, RepoError>;

    async fn get(&self, external_id: &str) -> Result<Option<PlaceRecord>, RepoError>;

    /// Active records fetched before `older_than`, oldest first.
    async fn list_stale(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PlaceRecord>, RepoError>;

    /// Soft-delete a record. Returns whether an active record was found.
    async fn deactivate(&self, external_id: &str) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait CallLedgerRepo: Send + Sync {
    async fn append(&self, entry: &CallLedgerEntry) -> Result<(), RepoError>;

    /// Per-day totals for entries recorded at or after `since`, ordered by day.
    async fn daily_totals(&self, since: OffsetDateTime)
    -> Result<Vec<LedgerDayTotals>, RepoError>;
}
