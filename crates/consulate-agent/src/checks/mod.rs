//! Health Checks
//!
//! Named TTL checks and the service heartbeat.
//!
//! Each logical check name gets its own worker task fed by an ordered channel,
//! so the register and set-state pair of one call never interleaves with
//! another call for the same name. Distinct names run in parallel.
//!
//! This module contains:
//! - `heartbeat`: Fixed-rate keep-alive loop

pub mod heartbeat;

pub use heartbeat::spawn_heartbeat_loop;

use crate::connection::BackendConnection;
use crate::observability::{events, metrics};
use crate::registration::RegistrationCoordinator;
use chrono::{DateTime, Utc};
use consulate_core::{CheckRegistration, CheckState, CoordinationError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, trace, warn};

/// Last state this process successfully reported for a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalCheckState {
    Unregistered,
    Passing,
    Failing,
}

impl From<CheckState> for LocalCheckState {
    fn from(state: CheckState) -> Self {
        match state {
            CheckState::Pass => LocalCheckState::Passing,
            CheckState::Fail => LocalCheckState::Failing,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub name: String,
    pub check_id: String,
    pub state: LocalCheckState,
    pub note: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

struct CheckCommand {
    state: CheckState,
    ttl: Duration,
    note: Option<String>,
    reply: oneshot::Sender<Result<()>>,
}

/// Completion of a submitted pass/fail call. Dropping it is fine.
pub struct CheckReceipt {
    rx: oneshot::Receiver<Result<()>>,
}

impl CheckReceipt {
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or_else(|_| {
            Err(CoordinationError::BackendUnavailable(
                "check worker stopped".to_string(),
            ))
        })
    }
}

struct Inner {
    connection: Arc<BackendConnection>,
    registration: Arc<RegistrationCoordinator>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<CheckCommand>>>,
    statuses: RwLock<HashMap<String, CheckStatus>>,
}

#[derive(Clone)]
pub struct CheckStateMachine {
    inner: Arc<Inner>,
}

impl CheckStateMachine {
    pub fn new(
        connection: Arc<BackendConnection>,
        registration: Arc<RegistrationCoordinator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                registration,
                workers: Mutex::new(HashMap::new()),
                statuses: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Report `name` as passing. Must be called from within a Tokio runtime.
    pub fn pass(&self, name: &str, ttl: Duration, note: Option<&str>) -> CheckReceipt {
        self.submit(name, CheckState::Pass, ttl, note)
    }

    /// Report `name` as failing. Must be called from within a Tokio runtime.
    pub fn fail(&self, name: &str, ttl: Duration, note: Option<&str>) -> CheckReceipt {
        self.submit(name, CheckState::Fail, ttl, note)
    }

    fn submit(
        &self,
        name: &str,
        state: CheckState,
        ttl: Duration,
        note: Option<&str>,
    ) -> CheckReceipt {
        let (reply, rx) = oneshot::channel();
        let mut command = CheckCommand {
            state,
            ttl,
            note: note.map(String::from),
            reply,
        };

        let mut workers = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(tx) = workers.get(name) {
            match tx.send(command) {
                Ok(()) => return CheckReceipt { rx },
                Err(mpsc::error::SendError(returned)) => command = returned,
            }
        }

        let (tx, commands) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below exits
        let _ = tx.send(command);
        workers.insert(name.to_string(), tx);
        tokio::spawn(run_worker(self.inner.clone(), name.to_string(), commands));
        trace!(check = %name, "Spawned check worker");

        CheckReceipt { rx }
    }

    /// Pass the service's own registration check.
    ///
    /// If the backend no longer knows the service it is registered again
    /// before the pass is retried.
    pub async fn keep_alive(&self) -> Result<()> {
        let result = self.try_keep_alive().await;
        metrics::record_heartbeat(if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn try_keep_alive(&self) -> Result<()> {
        let registration = &self.inner.registration;
        let registration_id = registration.identity().registration_id();
        let backend = self.inner.connection.get_or_reconnect().await?;

        match backend.pass_service(&registration_id, None).await {
            Ok(()) => {
                trace!(registration_id = %registration_id, "Heartbeat passed");
                Ok(())
            }
            Err(CoordinationError::NotRegistered(reason)) => {
                warn!(
                    registration_id = %registration_id,
                    reason = %reason,
                    "Service not registered, re-registering before heartbeat"
                );
                registration.ensure_registered().await?;
                let backend = self.inner.connection.get_or_reconnect().await?;
                backend.pass_service(&registration_id, None).await
            }
            Err(e) => Err(e),
        }
    }

    /// Last reported state of every named check, sorted by name.
    pub async fn snapshot(&self) -> Vec<CheckStatus> {
        let statuses = self.inner.statuses.read().await;
        let mut snapshot: Vec<CheckStatus> = statuses.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
    }

    pub async fn state_of(&self, name: &str) -> LocalCheckState {
        self.inner
            .statuses
            .read()
            .await
            .get(name)
            .map(|s| s.state)
            .unwrap_or(LocalCheckState::Unregistered)
    }
}

impl Inner {
    async fn apply(&self, name: &str, command: &CheckCommand) -> Result<()> {
        let identity = self.registration.identity();
        let check_id = identity.unique_name(name);
        let backend = self.connection.get_or_reconnect().await?;

        backend
            .register_check(&CheckRegistration {
                id: check_id.clone(),
                name: identity.check_display_name(name),
                service_id: identity.registration_id(),
                ttl: command.ttl,
                notes: command.note.clone(),
            })
            .await?;
        backend
            .update_check(&check_id, command.state, command.note.as_deref())
            .await
    }

    async fn record(&self, name: &str, command: &CheckCommand) {
        let check_id = self.registration.identity().unique_name(name);
        let new_state = LocalCheckState::from(command.state);
        let mut statuses = self.statuses.write().await;

        let status = statuses.entry(name.to_string()).or_insert_with(|| CheckStatus {
            name: name.to_string(),
            check_id: check_id.clone(),
            state: LocalCheckState::Unregistered,
            note: None,
            updated_at: None,
        });

        if status.state != new_state {
            events::check_state_changed(&check_id, &status.state.to_string(), &new_state.to_string());
        }
        status.state = new_state;
        status.note = command.note.clone();
        status.updated_at = Some(Utc::now());
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    name: String,
    mut commands: mpsc::UnboundedReceiver<CheckCommand>,
) {
    while let Some(command) = commands.recv().await {
        let result = inner.apply(&name, &command).await;
        match &result {
            Ok(()) => {
                inner.record(&name, &command).await;
                metrics::record_check_update(command.state.as_ref(), "ok");
                debug!(check = %name, state = %command.state, "Check updated");
            }
            Err(e) => {
                metrics::record_check_update(command.state.as_ref(), "error");
                warn!(check = %name, state = %command.state, error = %e, "Check update failed");
            }
        }
        let _ = command.reply.send(result);
    }
}
