//! Backend Connection
//!
//! Owns the live backend handle. Every component asks for a handle through
//! [`BackendConnection::get_or_reconnect`], which verifies the handle against
//! the leader endpoint and rebuilds it through the factory when unusable.
//!
//! ```text
//! Disconnected ──▶ Verifying ──▶ Connected
//!       ▲              │             │
//!       └── budget ────┘◀── verify ──┘
//!           exhausted      failed
//! ```

use crate::backend::{BackendFactory, CoordinationBackend};
use crate::observability::{events, metrics};
use backoff::{future::retry, ExponentialBackoff};
use consulate_core::{CoordinationError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Verifying,
    Connected,
}

pub struct BackendConnection {
    factory: Arc<dyn BackendFactory>,
    /// Label used in logs and events
    endpoint: String,
    handle: RwLock<Option<Arc<dyn CoordinationBackend>>>,
    state: RwLock<ConnectionState>,
    /// Serializes reconnect attempts
    reconnect_lock: Mutex<()>,
    retry_interval: Duration,
    retry_budget: Duration,
}

impl BackendConnection {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        endpoint: impl Into<String>,
        retry_interval: Duration,
        retry_budget: Duration,
    ) -> Self {
        Self {
            factory,
            endpoint: endpoint.into(),
            handle: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect_lock: Mutex::new(()),
            retry_interval,
            retry_budget,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Return a verified backend handle, rebuilding it if needed.
    ///
    /// Fails with `BackendUnavailable` once the retry budget is spent.
    pub async fn get_or_reconnect(&self) -> Result<Arc<dyn CoordinationBackend>> {
        let current = self.handle.read().await.clone();
        if let Some(backend) = current {
            if matches!(backend.leader().await, Ok(Some(_))) {
                return Ok(backend);
            }
        }

        let _guard = self.reconnect_lock.lock().await;
        let attempts = AtomicUsize::new(0);

        let result = retry(self.retry_policy(), || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.set_state(ConnectionState::Verifying).await;

            let backend = match self.current_or_rebuild(attempt).await {
                Ok(backend) => backend,
                Err(e) => return Err(backoff::Error::transient(e)),
            };

            match backend.leader().await {
                Ok(Some(leader)) => {
                    debug!(endpoint = %self.endpoint, leader = %leader, "Backend verified");
                    Ok(backend)
                }
                Ok(None) => {
                    self.handle.write().await.take();
                    warn!(endpoint = %self.endpoint, attempt, "Backend has no leader, retrying");
                    Err(backoff::Error::transient(CoordinationError::BackendUnavailable(
                        "no cluster leader".to_string(),
                    )))
                }
                Err(e) => {
                    self.handle.write().await.take();
                    warn!(endpoint = %self.endpoint, attempt, error = %e, "Backend verification failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await;

        match result {
            Ok(backend) => {
                self.set_state(ConnectionState::Connected).await;
                Ok(backend)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected).await;
                events::backend_unavailable(
                    &self.endpoint,
                    self.retry_budget.as_secs(),
                    &e.to_string(),
                );
                Err(CoordinationError::BackendUnavailable(format!(
                    "{} unreachable after {:?}: {e}",
                    self.endpoint, self.retry_budget
                )))
            }
        }
    }

    async fn current_or_rebuild(&self, attempt: usize) -> Result<Arc<dyn CoordinationBackend>> {
        if let Some(backend) = self.handle.read().await.clone() {
            return Ok(backend);
        }

        let backend = self.factory.connect()?;
        *self.handle.write().await = Some(backend.clone());
        metrics::record_backend_reconnect();
        events::backend_reconnected(&self.endpoint, attempt);
        Ok(backend)
    }

    /// Fixed delay between attempts, bounded by the total budget.
    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.retry_interval,
            initial_interval: self.retry_interval,
            max_interval: self.retry_interval,
            max_elapsed_time: Some(self.retry_budget),
            multiplier: 1.0,
            randomization_factor: 0.0,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, InMemoryFactory};

    fn connection(factory: Arc<InMemoryFactory>, budget: Duration) -> BackendConnection {
        BackendConnection::new(factory, "memory", Duration::from_millis(10), budget)
    }

    #[tokio::test]
    async fn test_connects_once_when_healthy() {
        let factory = Arc::new(InMemoryFactory::new(InMemoryBackend::new()));
        let conn = connection(factory.clone(), Duration::from_millis(200));

        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        conn.get_or_reconnect().await.unwrap();
        conn.get_or_reconnect().await.unwrap();

        assert_eq!(conn.state().await, ConnectionState::Connected);
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_unavailable() {
        let backend = InMemoryBackend::new();
        backend.set_available(false).await;
        let factory = Arc::new(InMemoryFactory::new(backend));
        let conn = connection(factory.clone(), Duration::from_millis(60));

        let err = conn.get_or_reconnect().await.err().unwrap();
        assert!(matches!(err, CoordinationError::BackendUnavailable(_)));
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert!(factory.connects() > 1);
    }

    #[tokio::test]
    async fn test_rebuilds_handle_after_outage() {
        let backend = InMemoryBackend::new();
        let factory = Arc::new(InMemoryFactory::new(backend.clone()));
        let conn = connection(factory.clone(), Duration::from_secs(2));
        conn.get_or_reconnect().await.unwrap();

        backend.set_available(false).await;
        let restore = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            restore.set_available(true).await;
        });

        conn.get_or_reconnect().await.unwrap();
        assert_eq!(conn.state().await, ConnectionState::Connected);
        assert!(factory.connects() >= 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_handle() {
        let factory = Arc::new(InMemoryFactory::new(InMemoryBackend::new()));
        let conn = Arc::new(connection(factory.clone(), Duration::from_millis(200)));

        let calls = (0..8).map(|_| {
            let conn = conn.clone();
            async move { conn.get_or_reconnect().await.map(|_| ()) }
        });
        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }

        assert_eq!(factory.connects(), 1);
    }
}
