//! In-process place store and call ledger for embedded mode and tests.
//!
//! Places are indexed on a uniform grid of [`GRID_CELL_DEGREES`] cells; a
//! radius query scans only the cells its bounding box intersects and then
//! refines candidates by haversine distance.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, RwLock},
};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{CallLedgerRepo, PlaceStore, RepoError},
    domain::{
        geo::{BoundingBox, GeoPoint},
        ledger::{CallLedgerEntry, LedgerDayTotals},
        places::{PlaceRecord, RadiusQuery, RadiusResult, UpsertOutcome},
    },
    util::lock::{mutex_lock, rw_read, rw_write},
};

pub const GRID_CELL_DEGREES: f64 = 0.05;

type Cell = (i32, i32);

fn cell_index(degrees: f64) -> i32 {
    (degrees / GRID_CELL_DEGREES).floor() as i32
}

fn cell_of(point: &GeoPoint) -> Cell {
    (cell_index(point.latitude), cell_index(point.longitude))
}

#[derive(Default)]
struct PlaceTable {
    records: HashMap<String, PlaceRecord>,
    grid: HashMap<Cell, HashSet<String>>,
}

impl PlaceTable {
    fn unindex(&mut self, record: &PlaceRecord) {
        let Some(location) = record.location else {
            return;
        };
        let cell = cell_of(&location);
        if let Some(ids) = self.grid.get_mut(&cell) {
            ids.remove(&record.external_id);
            if ids.is_empty() {
                self.grid.remove(&cell);
            }
        }
    }

    fn index(&mut self, record: &PlaceRecord) {
        if let Some(location) = record.location {
            self.grid
                .entry(cell_of(&location))
                .or_default()
                .insert(record.external_id.clone());
        }
    }

    /// Records whose grid cell intersects `bbox`.
    fn candidates(&self, bbox: &BoundingBox) -> Vec<PlaceRecord> {
        let lat_cells = cell_index(bbox.min_latitude)..=cell_index(bbox.max_latitude);
        let lng_bands: Vec<_> = bbox
            .longitude_ranges()
            .into_iter()
            .map(|(min, max)| cell_index(min)..=cell_index(max))
            .collect();

        let cell_count: usize = lng_bands
            .iter()
            .map(|band| band.clone().count())
            .sum::<usize>()
            * lat_cells.clone().count();

        // Wide boxes near the poles touch more cells than there are records.
        if cell_count > self.records.len() {
            return self
                .records
                .values()
                .filter(|record| record.location.is_some_and(|p| bbox.contains(&p)))
                .cloned()
                .collect();
        }

        let mut found = Vec::new();
        for lat in lat_cells {
            for band in &lng_bands {
                for lng in band.clone() {
                    let Some(ids) = self.grid.get(&(lat, lng)) else {
                        continue;
                    };
                    found.extend(ids.iter().filter_map(|id| self.records.get(id)).cloned());
                }
            }
        }
        found
    }
}

/// Grid-indexed [`PlaceStore`] held entirely in memory.
#[derive(Default)]
pub struct InMemoryPlaceStore {
    table: RwLock<PlaceTable>,
}

impl InMemoryPlaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.table, "memory_places.len").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PlaceStore for InMemoryPlaceStore {
    async fn upsert(&self, record: PlaceRecord) -> Result<UpsertOutcome, RepoError> {
        let mut table = rw_write(&self.table, "memory_places.upsert");
        let stored = table.records.get(&record.external_id).cloned();
        let outcome = UpsertOutcome::decide(
            stored.as_ref().map(|existing| existing.last_fetched_at),
            record.last_fetched_at,
        );

        if outcome != UpsertOutcome::RejectedStale {
            if let Some(previous) = stored.as_ref() {
                table.unindex(previous);
            }
            table.index(&record);
            table.records.insert(record.external_id.clone(), record);
        }
        Ok(outcome)
    }

    async fn query_within_radius(
        &self,
        query: &RadiusQuery,
        now: OffsetDateTime,
    ) -> Result<RadiusResult, RepoError> {
        let bbox = BoundingBox::around(&query.center, query.radius_meters);
        let candidates = rw_read(&self.table, "memory_places.query").candidates(&bbox);
        Ok(RadiusResult::from_candidates(candidates, query, now))
    }

    async fn get(&self, external_id: &str) -> Result<Option<PlaceRecord>, RepoError> {
        Ok(rw_read(&self.table, "memory_places.get")
            .records
            .get(external_id)
            .cloned())
    }

    async fn list_stale(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PlaceRecord>, RepoError> {
        let table = rw_read(&self.table, "memory_places.list_stale");
        let mut stale: Vec<PlaceRecord> = table
            .records
            .values()
            .filter(|record| record.is_active && record.last_fetched_at < older_than)
            .cloned()
            .collect();
        stale.sort_by(|a, b| {
            a.last_fetched_at
                .cmp(&b.last_fetched_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn deactivate(&self, external_id: &str) -> Result<bool, RepoError> {
        let mut table = rw_write(&self.table, "memory_places.deactivate");
        match table.records.get_mut(external_id) {
            Some(record) if record.is_active => {
                record.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Append-only [`CallLedgerRepo`] backed by a vector.
#[derive(Default)]
pub struct InMemoryCallLedger {
    entries: Mutex<Vec<CallLedgerEntry>>,
}

impl InMemoryCallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CallLedgerEntry> {
        mutex_lock(&self.entries, "memory_ledger.entries").clone()
    }
}

#[async_trait]
impl CallLedgerRepo for InMemoryCallLedger {
    async fn append(&self, entry: &CallLedgerEntry) -> Result<(), RepoError> {
        mutex_lock(&self.entries, "memory_ledger.append").push(entry.clone());
        Ok(())
    }

    async fn daily_totals(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<LedgerDayTotals>, RepoError> {
        let entries = mutex_lock(&self.entries, "memory_ledger.daily_totals");
        Ok(LedgerDayTotals::aggregate(
            entries.iter().filter(|entry| entry.recorded_at >= since),
        ))
    }
}
