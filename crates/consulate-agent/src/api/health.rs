//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Liveness probe. Verifies the coordination backend is reachable.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    let backend_check = tokio::time::timeout(
        Duration::from_secs(2),
        state.agent.connection().get_or_reconnect(),
    )
    .await;

    match backend_check {
        Ok(Ok(_)) => Ok("OK"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Backend health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            tracing::warn!("Backend health check timed out");
            Err(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

/// Readiness probe. OK once startup registration has completed.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::agent;
    use crate::backend::InMemoryBackend;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn state(backend: &InMemoryBackend) -> AppState {
        AppState {
            agent: Arc::new(agent(backend)),
            metrics_state: None,
            readiness: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_health_follows_backend() {
        let backend = InMemoryBackend::new();
        let state = state(&backend);

        assert_eq!(health_check(State(state.clone())).await, Ok("OK"));

        backend.set_available(false).await;
        assert_eq!(
            health_check(State(state)).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_readiness_flag() {
        let state = state(&InMemoryBackend::new());

        assert_eq!(
            readiness_check(State(state.clone())).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
        state.readiness.store(true, Ordering::Release);
        assert_eq!(readiness_check(State(state)).await, Ok("READY"));
    }
}
