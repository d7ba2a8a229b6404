//! In-flight provider searches keyed by query fingerprint.
//!
//! The first caller for a fingerprint becomes the leader and owns a
//! [`FlightLease`]; everyone arriving while the lease is held subscribes to
//! the same `watch` channel and observes exactly the value the leader
//! publishes.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tokio::sync::watch;

use crate::domain::query::QueryFingerprint;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlightError {
    #[error("in-flight search for `{0}` ended without publishing a result")]
    Abandoned(String),
}

type Slot<T> = watch::Receiver<Option<T>>;

pub struct InFlight<T> {
    flights: Arc<DashMap<QueryFingerprint, Slot<T>>>,
}

impl<T> Clone for InFlight<T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }
}

pub enum Flight<T> {
    Leader(FlightLease<T>),
    Follower(FlightWaiter<T>),
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lead a new flight for `key`, or join the one already running.
    pub fn join_or_lead(&self, key: &QueryFingerprint) -> Flight<T> {
        match self.flights.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                vacant.insert(receiver.clone());
                Flight::Leader(FlightLease {
                    key: key.clone(),
                    sender,
                    receiver,
                    flights: Arc::clone(&self.flights),
                })
            }
            Entry::Occupied(occupied) => Flight::Follower(FlightWaiter {
                key: key.clone(),
                receiver: occupied.get().clone(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

/// Exclusive right to publish the outcome for one fingerprint.
///
/// Dropping the lease frees the slot; waiters of a lease dropped without
/// [`FlightLease::complete`] observe [`FlightError::Abandoned`].
pub struct FlightLease<T> {
    key: QueryFingerprint,
    sender: watch::Sender<Option<T>>,
    receiver: watch::Receiver<Option<T>>,
    flights: Arc<DashMap<QueryFingerprint, Slot<T>>>,
}

impl<T: Clone> FlightLease<T> {
    /// A waiter for the leader itself.
    pub fn waiter(&self) -> FlightWaiter<T> {
        FlightWaiter {
            key: self.key.clone(),
            receiver: self.receiver.clone(),
        }
    }

    pub fn complete(self, value: T) {
        self.sender.send_replace(Some(value));
    }
}

impl<T> Drop for FlightLease<T> {
    fn drop(&mut self) {
        self.flights.remove(&self.key);
    }
}

pub struct FlightWaiter<T> {
    key: QueryFingerprint,
    receiver: watch::Receiver<Option<T>>,
}

impl<T: Clone> FlightWaiter<T> {
    pub async fn wait(mut self) -> Result<T, FlightError> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(value) => value
                .as_ref()
                .cloned()
                .ok_or_else(|| FlightError::Abandoned(self.key.to_string())),
            Err(_) => Err(FlightError::Abandoned(self.key.to_string())),
        }
    }
}
