//! Config Bootstrap
//!
//! Reconciles an application's default configuration against the copy stored
//! under `{baseKey}/config/current`, using the version tag stored next to it.
//!
//! | stored config | stored version   | result                              |
//! |---------------|------------------|-------------------------------------|
//! | absent        | -                | write defaults and version          |
//! | present       | equal            | untouched                           |
//! | present       | differs / absent | back up, replace, write new version |
//!
//! A read failure aborts before anything is written.

use crate::backend::CoordinationBackend;
use crate::config::OverridePolicy;
use crate::connection::BackendConnection;
use crate::observability::events;
use consulate_core::{keys, CoordinationError, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Backup key timestamp: ISO-8601 local date-time with nanoseconds
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Nothing was stored; defaults written
    Written,
    /// Stored configuration kept as is
    Unchanged,
    /// Stored configuration backed up and replaced
    Replaced { backup_key: String },
}

impl BootstrapOutcome {
    fn label(&self) -> &'static str {
        match self {
            BootstrapOutcome::Written => "written",
            BootstrapOutcome::Unchanged => "unchanged",
            BootstrapOutcome::Replaced { .. } => "replaced",
        }
    }
}

pub struct ConfigBootstrapper {
    connection: Arc<BackendConnection>,
    base_key: String,
    read_wait: Duration,
    policy: OverridePolicy,
}

impl ConfigBootstrapper {
    pub fn new(
        connection: Arc<BackendConnection>,
        base_key: impl Into<String>,
        read_wait: Duration,
        policy: OverridePolicy,
    ) -> Self {
        Self {
            connection,
            base_key: base_key.into(),
            read_wait,
            policy,
        }
    }

    /// Store `defaults` tagged with `version` unless an equal version is stored.
    pub async fn bootstrap<T: Serialize + ?Sized>(
        &self,
        defaults: &T,
        version: &str,
    ) -> Result<BootstrapOutcome> {
        let payload = serde_json::to_string(defaults)?;
        let current_key = keys::config_current(&self.base_key);
        let version_key = keys::config_current_version(&self.base_key);

        let backend = self.connection.get_or_reconnect().await?;
        let stored = backend.get(&current_key, Some(self.read_wait)).await?;

        let outcome = match stored {
            None => {
                backend.put(&current_key, &payload).await?;
                backend.put(&version_key, version).await?;
                BootstrapOutcome::Written
            }
            Some(existing) => {
                let stored_version = backend.get(&version_key, Some(self.read_wait)).await?;

                if self.policy == OverridePolicy::Never {
                    debug!(base_key = %self.base_key, "Override disabled, keeping stored configuration");
                    BootstrapOutcome::Unchanged
                } else if stored_version.as_deref() == Some(version) {
                    debug!(base_key = %self.base_key, version = %version, "Stored configuration is current");
                    BootstrapOutcome::Unchanged
                } else {
                    let backup_key = self.unused_backup_key(backend.as_ref()).await?;

                    backend.put(&backup_key, &existing).await?;
                    backend.delete(&current_key).await?;
                    backend.put(&current_key, &payload).await?;
                    backend.put(&version_key, version).await?;

                    info!(
                        base_key = %self.base_key,
                        previous_version = stored_version.as_deref().unwrap_or("<none>"),
                        version = %version,
                        backup_key = %backup_key,
                        "Replaced stored configuration"
                    );
                    BootstrapOutcome::Replaced { backup_key }
                }
            }
        };

        events::config_bootstrapped(&self.base_key, outcome.label(), version);
        Ok(outcome)
    }
}

impl ConfigBootstrapper {
    /// Timestamped backup key, suffixed `-1`, `-2`, ... if already taken.
    async fn unused_backup_key(&self, backend: &dyn CoordinationBackend) -> Result<String> {
        let timestamp = chrono::Local::now()
            .format(BACKUP_TIMESTAMP_FORMAT)
            .to_string();
        unused_key(backend, keys::config_backup(&self.base_key, &timestamp)).await
    }
}

async fn unused_key(backend: &dyn CoordinationBackend, base: String) -> Result<String> {
    let mut candidate = base.clone();
    let mut suffix = 0u32;
    while backend.get(&candidate, None).await?.is_some() {
        suffix += 1;
        candidate = format!("{base}-{suffix}");
    }
    Ok(candidate)
}

/// Load a JSON defaults document from disk.
pub fn read_defaults_file(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CoordinationError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&raw)?)
}
