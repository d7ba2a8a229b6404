//! Sticky per-session routing between the cache path and the legacy path.

use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    sync::{Arc, Mutex, RwLock},
};

use lru::LruCache;
use metrics::gauge;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    domain::rollout::{RolloutConfig, RolloutSession, ServePath},
    util::lock::{mutex_lock, rw_read, rw_write},
};

const MAX_SESSION_ID_LEN: usize = 128;

/// Source of uniformly distributed buckets in `[0, 100)`.
pub trait BucketSource: Send + Sync {
    fn next_bucket(&self) -> u8;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBuckets;

impl BucketSource for RandomBuckets {
    fn next_bucket(&self) -> u8 {
        rand::random_range(0..100)
    }
}

/// Replays a fixed bucket sequence, repeating the last value once drained.
#[derive(Debug)]
pub struct ScriptedBuckets {
    queue: Mutex<VecDeque<u8>>,
    last: Mutex<u8>,
}

impl ScriptedBuckets {
    pub fn new(buckets: impl IntoIterator<Item = u8>) -> Self {
        Self {
            queue: Mutex::new(buckets.into_iter().map(|b| b % 100).collect()),
            last: Mutex::new(0),
        }
    }
}

impl BucketSource for ScriptedBuckets {
    fn next_bucket(&self) -> u8 {
        let mut last = mutex_lock(&self.last, "scripted_buckets.last");
        if let Some(next) = mutex_lock(&self.queue, "scripted_buckets.queue").pop_front() {
            *last = next;
        }
        *last
    }
}

/// Routing decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDecision {
    pub session_id: String,
    pub bucket: u8,
    pub path: ServePath,
    /// The session id was minted for this request.
    pub issued: bool,
}

pub struct RolloutController {
    config: RwLock<RolloutConfig>,
    sessions: Mutex<LruCache<String, RolloutSession>>,
    buckets: Arc<dyn BucketSource>,
}

impl RolloutController {
    pub fn new(
        config: RolloutConfig,
        session_capacity: NonZeroUsize,
        buckets: Arc<dyn BucketSource>,
    ) -> Self {
        publish_percentage(&config);
        Self {
            config: RwLock::new(config),
            sessions: Mutex::new(LruCache::new(session_capacity)),
            buckets,
        }
    }

    pub fn config(&self) -> RolloutConfig {
        *rw_read(&self.config, "rollout.config")
    }

    /// Swap the whole configuration snapshot, returning the previous one.
    pub fn replace_config(&self, next: RolloutConfig) -> RolloutConfig {
        let previous = std::mem::replace(&mut *rw_write(&self.config, "rollout.replace"), next);
        publish_percentage(&next);
        info!(
            target = "placecache::application::rollout",
            previous_enabled = previous.enabled(),
            previous_percentage = previous.percentage(),
            enabled = next.enabled(),
            percentage = next.percentage(),
            "rollout configuration replaced"
        );
        previous
    }

    /// Resolve the path for a session, assigning a bucket on first contact.
    ///
    /// Missing or malformed ids get a freshly issued session.
    pub fn choose_path(&self, session_id: Option<&str>) -> PathDecision {
        let config = self.config();
        let (session_id, issued) = match session_id.filter(|id| is_valid_session_id(id)) {
            Some(id) => (id.to_string(), false),
            None => (Uuid::new_v4().simple().to_string(), true),
        };

        let mut sessions = mutex_lock(&self.sessions, "rollout.sessions");
        let (bucket, path) = match sessions.get_mut(&session_id) {
            Some(session) => (session.bucket(), session.choose_path(&config)),
            None => {
                let mut session =
                    RolloutSession::from_draw(session_id.clone(), self.buckets.next_bucket());
                debug!(
                    target = "placecache::application::rollout",
                    session_id = session.id(),
                    bucket = session.bucket(),
                    "assigned rollout bucket"
                );
                let decided = (session.bucket(), session.choose_path(&config));
                sessions.put(session_id.clone(), session);
                decided
            }
        };

        PathDecision {
            session_id,
            bucket,
            path,
            issued,
        }
    }

    /// Look up an assigned session without touching its recency.
    pub fn session(&self, session_id: &str) -> Option<RolloutSession> {
        mutex_lock(&self.sessions, "rollout.session")
            .peek(session_id)
            .cloned()
    }

    /// Terminate a session explicitly. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> bool {
        mutex_lock(&self.sessions, "rollout.end_session")
            .pop(session_id)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        mutex_lock(&self.sessions, "rollout.session_count").len()
    }
}

fn publish_percentage(config: &RolloutConfig) {
    let effective = if config.enabled() {
        config.percentage()
    } else {
        0
    };
    gauge!("placecache_rollout_percentage").set(f64::from(effective));
}

fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
