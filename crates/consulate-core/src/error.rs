//! Error taxonomy for coordination backend operations.

use thiserror::Error;

/// Errors surfaced by backend calls and the components built on top of them.
///
/// Lock contention is not represented here: a contended `acquire` returns
/// `None` instead of an error.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Backend unreachable or leaderless after the retry budget was spent.
    #[error("coordination backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend answered with something we could not interpret.
    #[error("malformed backend response: {0}")]
    BackendProtocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A check or service operation referenced an entity the backend does not know.
    #[error("not registered: {0}")]
    NotRegistered(String),

    /// Stored configuration exists but cannot be interpreted.
    #[error("stored configuration is unreadable: {0}")]
    ConfigData(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl CoordinationError {
    /// Whether this error means the backend could not be reached or understood.
    ///
    /// Protocol errors are grouped with unavailability.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CoordinationError::BackendUnavailable(_) | CoordinationError::BackendProtocol(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_count_as_unavailable() {
        assert!(CoordinationError::BackendProtocol("bad json".into()).is_unavailable());
        assert!(CoordinationError::BackendUnavailable("no leader".into()).is_unavailable());
        assert!(!CoordinationError::NotRegistered("svc".into()).is_unavailable());
    }

    #[test]
    fn test_error_messages() {
        let err = CoordinationError::NotRegistered("orders-heartbeat@host:80".into());
        assert_eq!(err.to_string(), "not registered: orders-heartbeat@host:80");
    }
}
