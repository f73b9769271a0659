//! Check State Endpoint
//!
//! Exposes named check states at GET /checks

use super::AppState;
use crate::checks::CheckStatus;
use axum::{extract::State, Json};
use serde::Serialize;

/// Response for GET /checks
#[derive(Debug, Serialize)]
pub struct ChecksResponse {
    pub service_id: String,
    pub registration_id: String,
    pub connection: String,
    pub checks: Vec<CheckStatus>,
}

/// GET /checks - last reported state of every named check
#[tracing::instrument(skip(state))]
pub async fn get_checks(State(state): State<AppState>) -> Json<ChecksResponse> {
    let identity = state.agent.identity();

    Json(ChecksResponse {
        service_id: identity.service_id.clone(),
        registration_id: identity.registration_id(),
        connection: state.agent.connection().state().await.to_string(),
        checks: state.agent.checks().snapshot().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::agent;
    use crate::backend::InMemoryBackend;
    use crate::checks::LocalCheckState;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checks_lists_reported_state() {
        let backend = InMemoryBackend::new();
        let agent = Arc::new(agent(&backend));
        agent.start().await.unwrap();
        agent
            .checks()
            .fail("db", Duration::from_secs(60), Some("timeout"))
            .wait()
            .await
            .unwrap();

        let state = AppState {
            agent,
            metrics_state: None,
            readiness: Arc::new(AtomicBool::new(true)),
        };
        let Json(response) = get_checks(State(state)).await;

        assert_eq!(response.registration_id, "orders-1-heartbeat@node-a:8080");
        assert_eq!(response.connection, "Connected");
        assert_eq!(response.checks.len(), 1);
        assert_eq!(response.checks[0].state, LocalCheckState::Failing);
        assert_eq!(response.checks[0].note.as_deref(), Some("timeout"));
    }
}
