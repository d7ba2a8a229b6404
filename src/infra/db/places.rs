use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    application::repos::{PlaceStore, RepoError},
    domain::{
        geo::{BoundingBox, GeoPoint},
        places::{PlaceRecord, RadiusQuery, RadiusResult, UpsertOutcome},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const PLACE_COLUMNS: &str = "external_id, name, address, suburb, state, postcode, \
     latitude, longitude, rating, review_count, phone, website, business_status, open_now, \
     last_fetched_at, is_active";

#[derive(sqlx::FromRow)]
struct PlaceRow {
    external_id: String,
    name: Option<String>,
    address: Option<String>,
    suburb: Option<String>,
    state: Option<String>,
    postcode: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    rating: Option<f64>,
    review_count: Option<i64>,
    phone: Option<String>,
    website: Option<String>,
    business_status: Option<String>,
    open_now: Option<bool>,
    last_fetched_at: OffsetDateTime,
    is_active: bool,
}

impl From<PlaceRow> for PlaceRecord {
    fn from(row: PlaceRow) -> Self {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => GeoPoint::new(latitude, longitude).ok(),
            _ => None,
        };

        Self {
            external_id: row.external_id,
            name: row.name,
            address: row.address,
            suburb: row.suburb,
            state: row.state,
            postcode: row.postcode,
            location,
            rating: row.rating,
            review_count: row.review_count,
            phone: row.phone,
            website: row.website,
            business_status: row.business_status,
            open_now: row.open_now,
            last_fetched_at: row.last_fetched_at,
            is_active: row.is_active,
        }
    }
}

/// Append the bounding-box predicate; two longitude bands across the antimeridian.
fn push_bounding_box(qb: &mut QueryBuilder<'_, Postgres>, bbox: &BoundingBox) {
    qb.push(" AND latitude BETWEEN ");
    qb.push_bind(bbox.min_latitude);
    qb.push(" AND ");
    qb.push_bind(bbox.max_latitude);
    qb.push(" AND (");
    for (index, (min, max)) in bbox.longitude_ranges().into_iter().enumerate() {
        if index > 0 {
            qb.push(" OR ");
        }
        qb.push("longitude BETWEEN ");
        qb.push_bind(min);
        qb.push(" AND ");
        qb.push_bind(max);
    }
    qb.push(")");
}

#[async_trait]
impl PlaceStore for PostgresRepositories {
    async fn upsert(&self, record: PlaceRecord) -> Result<UpsertOutcome, RepoError> {
        let (latitude, longitude) = match record.location {
            Some(point) => (Some(point.latitude), Some(point.longitude)),
            None => (None, None),
        };

        let inserted: Option<bool> = sqlx::query_scalar(
            "INSERT INTO places (external_id, name, address, suburb, state, postcode, \
                 latitude, longitude, rating, review_count, phone, website, business_status, \
                 open_now, last_fetched_at, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (external_id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 address = EXCLUDED.address, \
                 suburb = EXCLUDED.suburb, \
                 state = EXCLUDED.state, \
                 postcode = EXCLUDED.postcode, \
                 latitude = EXCLUDED.latitude, \
                 longitude = EXCLUDED.longitude, \
                 rating = EXCLUDED.rating, \
                 review_count = EXCLUDED.review_count, \
                 phone = EXCLUDED.phone, \
                 website = EXCLUDED.website, \
                 business_status = EXCLUDED.business_status, \
                 open_now = EXCLUDED.open_now, \
                 last_fetched_at = EXCLUDED.last_fetched_at, \
                 is_active = EXCLUDED.is_active \
             WHERE places.last_fetched_at < EXCLUDED.last_fetched_at \
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(&record.external_id)
        .bind(&record.name)
        .bind(&record.address)
        .bind(&record.suburb)
        .bind(&record.state)
        .bind(&record.postcode)
        .bind(latitude)
        .bind(longitude)
        .bind(record.rating)
        .bind(record.review_count)
        .bind(&record.phone)
        .bind(&record.website)
        .bind(&record.business_status)
        .bind(record.open_now)
        .bind(record.last_fetched_at)
        .bind(record.is_active)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let outcome = match inserted {
            Some(true) => UpsertOutcome::Inserted,
            Some(false) => UpsertOutcome::Updated,
            None => UpsertOutcome::RejectedStale,
        };
        debug!(
            target = "placecache::infra::db::places",
            external_id = %record.external_id,
            outcome = outcome.as_str(),
            "place upserted"
        );
        Ok(outcome)
    }

    async fn query_within_radius(
        &self,
        query: &RadiusQuery,
        now: OffsetDateTime,
    ) -> Result<RadiusResult, RepoError> {
        let bbox = BoundingBox::around(&query.center, query.radius_meters);

        let mut qb = QueryBuilder::new(format!(
            "SELECT {PLACE_COLUMNS} FROM places \
             WHERE is_active AND latitude IS NOT NULL AND longitude IS NOT NULL"
        ));
        push_bounding_box(&mut qb, &bbox);

        let rows: Vec<PlaceRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(RadiusResult::from_candidates(
            rows.into_iter().map(PlaceRecord::from),
            query,
            now,
        ))
    }

    async fn get(&self, external_id: &str) -> Result<Option<PlaceRecord>, RepoError> {
        let row: Option<PlaceRow> = sqlx::query_as(&format!(
            "SELECT {PLACE_COLUMNS} FROM places WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(PlaceRecord::from))
    }

    async fn list_stale(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PlaceRecord>, RepoError> {
        let rows: Vec<PlaceRow> = sqlx::query_as(&format!(
            "SELECT {PLACE_COLUMNS} FROM places \
             WHERE is_active AND last_fetched_at < $1 \
             ORDER BY last_fetched_at ASC, external_id ASC \
             LIMIT $2"
        ))
        .bind(older_than)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PlaceRecord::from).collect())
    }

    async fn deactivate(&self, external_id: &str) -> Result<bool, RepoError> {
        let result =
            sqlx::query("UPDATE places SET is_active = FALSE WHERE external_id = $1 AND is_active")
                .bind(external_id)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
