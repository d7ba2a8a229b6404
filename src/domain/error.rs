use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
    #[error("invalid rollout configuration: {message}")]
    InvalidRollout { message: String },
    #[error("domain invariant violated: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn invalid_rollout(message: impl Into<String>) -> Self {
        Self::InvalidRollout {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
