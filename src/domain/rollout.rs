//! Rollout configuration and the pure path decision for a session.

use super::error::DomainError;

/// Which query path a session is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServePath {
    Cache,
    Legacy,
}

impl ServePath {
    pub fn as_str(self) -> &'static str {
        match self {
            ServePath::Cache => "cache",
            ServePath::Legacy => "legacy",
        }
    }
}

/// Snapshot of the rollout knobs. Replaced whole, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutConfig {
    enabled: bool,
    percentage: u8,
}

impl RolloutConfig {
    pub fn new(enabled: bool, percentage: u8) -> Result<Self, DomainError> {
        if percentage > 100 {
            return Err(DomainError::invalid_rollout(format!(
                "rollout percentage `{percentage}` must be within [0, 100]"
            )));
        }
        Ok(Self {
            enabled,
            percentage,
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            percentage: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    /// Path forced by the configuration alone, regardless of bucket.
    fn forced_path(&self) -> Option<ServePath> {
        if !self.enabled || self.percentage == 0 {
            Some(ServePath::Legacy)
        } else if self.percentage >= 100 {
            Some(ServePath::Cache)
        } else {
            None
        }
    }
}

/// One client session. The bucket is drawn once and never reassigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutSession {
    id: String,
    bucket: u8,
    pinned: Option<ServePath>,
}

impl RolloutSession {
    pub fn new(id: impl Into<String>, bucket: u8) -> Result<Self, DomainError> {
        if bucket >= 100 {
            return Err(DomainError::invariant(format!(
                "rollout bucket `{bucket}` must be within [0, 100)"
            )));
        }
        Ok(Self {
            id: id.into(),
            bucket,
            pinned: None,
        })
    }

    /// Build a session from a raw draw, folding it into `[0, 100)`.
    pub fn from_draw(id: impl Into<String>, draw: u8) -> Self {
        Self {
            id: id.into(),
            bucket: draw % 100,
            pinned: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bucket(&self) -> u8 {
        self.bucket
    }

    pub fn pinned(&self) -> Option<ServePath> {
        self.pinned
    }

    /// Resolve the path for this session under `config`.
    ///
    /// Disabled, 0% and 100% configurations force a path. Partial rollouts
    /// compare the bucket once and pin the result, so later percentage changes
    /// never move a session between paths.
    pub fn choose_path(&mut self, config: &RolloutConfig) -> ServePath {
        if let Some(path) = config.forced_path() {
            return path;
        }
        if let Some(path) = self.pinned {
            return path;
        }
        let path = if self.bucket < config.percentage {
            ServePath::Cache
        } else {
            ServePath::Legacy
        };
        self.pinned = Some(path);
        path
    }
}
