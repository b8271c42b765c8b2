//! Error taxonomy for the POS core.
//!
//! Four business error kinds plus a storage kind for the local SQLite layer.
//! The propagation policy is strict: `Validation` never reaches the network,
//! and `Network` failures during order submission are recovered by queuing the
//! order locally rather than surfaced as hard failures.

use thiserror::Error;

/// Errors surfaced by the POS core.
#[derive(Debug, Error)]
pub enum PosError {
    /// A state conflict on the server, e.g. starting a shift while one is open.
    #[error("{0}")]
    Conflict(String),

    /// The server does not know the requested entity (shift, product, order).
    #[error("{0}")]
    NotFound(String),

    /// Transport failure or server-side error; safe to retry later.
    #[error("{0}")]
    Network(String),

    /// A local precondition failed; no network call was made.
    #[error("{0}")]
    Validation(String),

    /// Local SQLite persistence failure.
    #[error("{0}")]
    Storage(String),
}

pub type PosResult<T> = Result<T, PosError>;

impl PosError {
    /// True for failures worth retrying on the next connectivity event.
    pub fn is_transient(&self) -> bool {
        matches!(self, PosError::Network(_))
    }
}

impl From<rusqlite::Error> for PosError {
    fn from(err: rusqlite::Error) -> Self {
        PosError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PosError {
    fn from(err: serde_json::Error) -> Self {
        PosError::Storage(format!("json encode/decode: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_transient() {
        assert!(PosError::Network("server error (HTTP 503)".into()).is_transient());
        assert!(!PosError::Conflict("shift already open".into()).is_transient());
        assert!(!PosError::NotFound("no such product".into()).is_transient());
        assert!(!PosError::Validation("empty cart".into()).is_transient());
        assert!(!PosError::Storage("disk full".into()).is_transient());
    }
}
