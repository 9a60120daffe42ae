//! Error taxonomy shared by the reconciliation core.

use crate::governance::{Address, DecodeError, DecodeErrorKind};

/// Errors surfaced by the engine and the cache.
///
/// `Clone` so that every caller waiting on a shared cache computation observes
/// the same failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("malformed account {address}: {detail}")]
    MalformedAccount { address: Address, detail: String },

    #[error("unsupported account version at {address}: {detail}")]
    UnsupportedVersion { address: Address, detail: String },

    #[error("{entity} not found: {address}")]
    NotFound { entity: &'static str, address: Address },

    #[error("upstream failed for {} account(s)", failed.len())]
    PartialUpstreamFailure { failed: Vec<Address> },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("relational store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Lifts a decode failure of the account at `address` into the core taxonomy.
    pub fn decode(address: Address, err: DecodeError) -> Self {
        match err.kind {
            DecodeErrorKind::MalformedAccount => CoreError::MalformedAccount {
                address,
                detail: err.to_string(),
            },
            DecodeErrorKind::UnsupportedVersion => CoreError::UnsupportedVersion {
                address,
                detail: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
