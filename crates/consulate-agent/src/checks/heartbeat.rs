//! Heartbeat loop.

use super::CheckStateMachine;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Call `keep_alive` every `rate` until the task is aborted.
///
/// Each call completes before the next tick is awaited, so heartbeats never
/// overlap. Ticks missed during a slow call are skipped rather than bunched.
pub fn spawn_heartbeat_loop(
    checks: CheckStateMachine,
    rate: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(rate);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(rate_secs = rate.as_secs(), "Heartbeat loop started");

        loop {
            interval.tick().await;

            if let Err(e) = checks.keep_alive().await {
                warn!(error = %e, "Heartbeat failed, retrying next cycle");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::registration::tests::{connection, coordinator};
    use consulate_core::CheckState;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_heals_and_passes() {
        let backend = InMemoryBackend::new();
        let registration = Arc::new(coordinator(&backend));
        let checks = CheckStateMachine::new(connection(&backend), registration);

        // Not registered yet: the first beat registers the service
        let handle = spawn_heartbeat_loop(checks, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(backend.registered_services().await.len(), 1);
        assert_eq!(
            backend
                .service_check_state("orders-1-heartbeat@node-a:8080")
                .await,
            Some(CheckState::Pass)
        );
    }

    #[tokio::test]
    async fn test_loop_survives_outage() {
        let backend = InMemoryBackend::new();
        backend.set_available(false).await;
        let registration = Arc::new(coordinator(&backend));
        let checks = CheckStateMachine::new(connection(&backend), registration);

        let handle = spawn_heartbeat_loop(checks, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished());

        backend.set_available(true).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert_eq!(backend.registered_services().await.len(), 1);
    }
}
