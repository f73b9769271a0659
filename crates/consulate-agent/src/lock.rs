//! Distributed Lock
//!
//! Session-scoped mutual exclusion on `{baseKey}/lock`. Acquisition is a
//! single try: contention returns `None` and the caller decides whether to
//! poll. Expiry of the backing session releases the lock on the backend.

use crate::connection::BackendConnection;
use crate::observability::{events, metrics};
use consulate_core::{keys, LockHandle, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct DistributedLock {
    connection: Arc<BackendConnection>,
    key: String,
    session_ttl: Duration,
}

impl DistributedLock {
    pub fn new(connection: Arc<BackendConnection>, base_key: &str, session_ttl: Duration) -> Self {
        Self {
            connection,
            key: keys::lock(base_key),
            session_ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try once to take the lock. Not reentrant.
    pub async fn acquire(&self) -> Option<LockHandle> {
        match self.try_acquire().await {
            Ok(Some(handle)) => {
                metrics::record_lock_attempt("acquired");
                events::lock_acquired(&handle.key, &handle.session_id);
                Some(handle)
            }
            Ok(None) => {
                metrics::record_lock_attempt("contended");
                debug!(key = %self.key, "Lock held by another session");
                None
            }
            Err(e) => {
                metrics::record_lock_attempt("error");
                warn!(key = %self.key, error = %e, "Lock acquisition failed");
                None
            }
        }
    }

    async fn try_acquire(&self) -> Result<Option<LockHandle>> {
        let backend = self.connection.get_or_reconnect().await?;
        let session_id = backend.create_session(self.session_ttl).await?;

        let acquired = match backend.acquire_lock(&self.key, &session_id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                if let Err(destroy_err) = backend.destroy_session(&session_id).await {
                    debug!(
                        session_id = %session_id,
                        error = %destroy_err,
                        "Failed to destroy unused session"
                    );
                }
                return Err(e);
            }
        };

        if acquired {
            return Ok(Some(LockHandle {
                session_id,
                key: self.key.clone(),
            }));
        }

        if let Err(e) = backend.destroy_session(&session_id).await {
            debug!(session_id = %session_id, error = %e, "Failed to destroy unused session");
        }
        Ok(None)
    }

    /// Release the lock and destroy its session.
    ///
    /// Best-effort: returns whether the lock was still held by `handle`.
    pub async fn release(&self, handle: &LockHandle) -> bool {
        let backend = match self.connection.get_or_reconnect().await {
            Ok(backend) => backend,
            Err(e) => {
                warn!(key = %handle.key, error = %e, "Cannot release lock, backend unavailable");
                return false;
            }
        };

        let released = backend
            .release_lock(&handle.key, &handle.session_id)
            .await
            .unwrap_or_else(|e| {
                warn!(key = %handle.key, error = %e, "Lock release failed");
                false
            });

        if let Err(e) = backend.destroy_session(&handle.session_id).await {
            warn!(session_id = %handle.session_id, error = %e, "Session destroy failed");
        }

        events::lock_released(&handle.key, &handle.session_id, released);
        released
    }
}
