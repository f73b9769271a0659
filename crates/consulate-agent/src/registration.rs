//! Service Registration
//!
//! Idempotent self-registration of this process plus the access record
//! advertised under `{serviceName}/access/{hostname}:{port}`.

use crate::connection::BackendConnection;
use crate::observability::{events, metrics};
use consulate_core::{keys, AccessRecord, Result, ServiceIdentity, ServiceRegistration, TtlCheck};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RegistrationOutcome {
    Registered,
    AlreadyRegistered,
}

/// Credentials published in the access record.
#[derive(Debug, Clone, Default)]
pub struct AccessCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct RegistrationCoordinator {
    connection: Arc<BackendConnection>,
    identity: ServiceIdentity,
    heartbeat_ttl: Duration,
    credentials: AccessCredentials,
}

impl RegistrationCoordinator {
    pub fn new(
        connection: Arc<BackendConnection>,
        identity: ServiceIdentity,
        heartbeat_ttl: Duration,
        credentials: AccessCredentials,
    ) -> Self {
        Self {
            connection,
            identity,
            heartbeat_ttl,
            credentials,
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_ttl
    }

    fn registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            id: self.identity.registration_id(),
            name: self.identity.service_name.clone(),
            tags: self.identity.tags.clone(),
            address: self.identity.address.clone(),
            port: self.identity.port,
            check: TtlCheck {
                ttl: self.heartbeat_ttl,
            },
        }
    }

    fn access_record(&self) -> AccessRecord {
        AccessRecord {
            hostname: self.identity.hostname.clone(),
            ip: self.identity.address.clone(),
            port: self.identity.port,
            username: self.credentials.username.clone().unwrap_or_default(),
            password: self.credentials.password.clone().unwrap_or_default(),
        }
    }

    /// Register this process unless the backend already knows it.
    ///
    /// Registration failures propagate. The access record is rewritten on
    /// every call and a failure to write it is only logged.
    pub async fn ensure_registered(&self) -> Result<RegistrationOutcome> {
        let backend = self.connection.get_or_reconnect().await?;
        let registration_id = self.identity.registration_id();

        let outcome = if backend.is_registered(&registration_id).await? {
            debug!(registration_id = %registration_id, "Service already registered");
            RegistrationOutcome::AlreadyRegistered
        } else {
            backend.register_service(&self.registration()).await?;
            metrics::record_registration();
            events::service_registered(
                &registration_id,
                &self.identity.address,
                self.identity.port,
                self.heartbeat_ttl.as_secs(),
            );
            RegistrationOutcome::Registered
        };

        if let Err(e) = self.write_access_record().await {
            warn!(error = %e, registration_id = %registration_id, "Failed to write access record");
        }

        Ok(outcome)
    }

    async fn write_access_record(&self) -> Result<()> {
        let key = keys::access(
            &self.identity.service_name,
            &self.identity.hostname,
            self.identity.port,
        );
        let value = serde_json::to_string(&self.access_record())?;
        let backend = self.connection.get_or_reconnect().await?;
        backend.put(&key, &value).await
    }

    /// Remove this process's registration, and with it every bound check.
    pub async fn deregister(&self) -> Result<()> {
        let registration_id = self.identity.registration_id();
        let backend = self.connection.get_or_reconnect().await?;
        backend.deregister_service(&registration_id).await?;
        events::service_deregistered(&registration_id);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{CoordinationBackend, InMemoryBackend, InMemoryFactory};
    use consulate_core::CoordinationError;

    pub(crate) fn identity() -> ServiceIdentity {
        ServiceIdentity {
            service_id: "orders-1".to_string(),
            service_name: "orders".to_string(),
            tags: vec!["v1".to_string()],
            address: "10.0.0.7".to_string(),
            port: 8080,
            hostname: "node-a".to_string(),
        }
    }

    pub(crate) fn connection(backend: &InMemoryBackend) -> Arc<BackendConnection> {
        Arc::new(BackendConnection::new(
            Arc::new(InMemoryFactory::new(backend.clone())),
            "memory",
            Duration::from_millis(10),
            Duration::from_millis(50),
        ))
    }

    pub(crate) fn coordinator(backend: &InMemoryBackend) -> RegistrationCoordinator {
        RegistrationCoordinator::new(
            connection(backend),
            identity(),
            Duration::from_secs(1800),
            AccessCredentials {
                username: Some("ops".to_string()),
                password: None,
            },
        )
    }

    #[tokio::test]
    async fn test_ensure_registered_is_idempotent() {
        let backend = InMemoryBackend::new();
        let coordinator = coordinator(&backend);

        assert_eq!(
            coordinator.ensure_registered().await.unwrap(),
            RegistrationOutcome::Registered
        );
        assert_eq!(
            coordinator.ensure_registered().await.unwrap(),
            RegistrationOutcome::AlreadyRegistered
        );

        assert_eq!(backend.registration_writes().await, 1);
        let services = backend.registered_services().await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, "orders-1-heartbeat@node-a:8080");
        assert_eq!(services[0].check.ttl, Duration::from_secs(1800));
        assert_eq!(services[0].address, "10.0.0.7");
    }

    #[tokio::test]
    async fn test_access_record_is_rewritten_every_call() {
        let backend = InMemoryBackend::new();
        let coordinator = coordinator(&backend);
        let key = "orders/access/node-a:8080";

        coordinator.ensure_registered().await.unwrap();
        let stored = backend.get(key, None).await.unwrap().unwrap();
        let record: AccessRecord = serde_json::from_str(&stored).unwrap();
        assert_eq!(record.ip, "10.0.0.7");
        assert_eq!(record.username, "ops");
        assert_eq!(record.password, "");

        backend.delete(key).await.unwrap();
        coordinator.ensure_registered().await.unwrap();
        assert!(backend.get(key, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_registration_failure_propagates() {
        let backend = InMemoryBackend::new();
        backend.set_available(false).await;

        let err = coordinator(&backend).ensure_registered().await.unwrap_err();
        assert!(matches!(err, CoordinationError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_deregister_removes_registration() {
        let backend = InMemoryBackend::new();
        let coordinator = coordinator(&backend);
        coordinator.ensure_registered().await.unwrap();

        coordinator.deregister().await.unwrap();
        assert!(backend.registered_services().await.is_empty());
    }
}
