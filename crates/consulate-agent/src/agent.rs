//! Agent
//!
//! Wires every component around one shared [`BackendConnection`]. The hosting
//! application builds an `Agent`, calls [`Agent::start`] to register, optionally
//! bootstraps its default configuration, then spawns the heartbeat loop.

use crate::address::{AddressResolver, LocalAddressResolver, StaticAddressResolver};
use crate::backend::{BackendFactory, HttpBackendFactory};
use crate::catalog::CatalogResolver;
use crate::checks::{spawn_heartbeat_loop, CheckStateMachine};
use crate::config::AgentConfig;
use crate::connection::BackendConnection;
use crate::kv::{BootstrapOutcome, ConfigBootstrapper, KvTemplate};
use crate::lock::DistributedLock;
use crate::registration::{AccessCredentials, RegistrationCoordinator, RegistrationOutcome};
use consulate_core::{Result, ServiceIdentity};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Agent {
    identity: ServiceIdentity,
    heartbeat_rate: Duration,
    connection: Arc<BackendConnection>,
    registration: Arc<RegistrationCoordinator>,
    checks: CheckStateMachine,
    bootstrapper: ConfigBootstrapper,
    kv: KvTemplate,
    lock: DistributedLock,
    catalog: CatalogResolver,
}

impl Agent {
    /// Build an agent talking to Consul over HTTP.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let factory = Arc::new(HttpBackendFactory::new(
            config.consul_url(),
            config.request_timeout,
        ));

        let hostname = config
            .hostname
            .clone()
            .unwrap_or_else(crate::address::system_hostname);
        let resolver: Box<dyn AddressResolver> = match &config.advertise_address {
            Some(address) => Box::new(StaticAddressResolver::new(address.clone(), hostname)),
            None => Box::new(LocalAddressResolver::new(Some(hostname))),
        };

        Self::new(config, factory, config.consul_url(), resolver.as_ref())
    }

    pub fn new(
        config: &AgentConfig,
        factory: Arc<dyn BackendFactory>,
        endpoint: impl Into<String>,
        resolver: &dyn AddressResolver,
    ) -> Result<Self> {
        config.validate()?;

        let identity = ServiceIdentity {
            service_id: config.service_id.clone(),
            service_name: config.service_name.clone(),
            tags: config.tags.clone(),
            address: resolver.local_address(),
            port: config.service_port,
            hostname: resolver.hostname(),
        };
        let base_key = identity.base_key();

        let connection = Arc::new(BackendConnection::new(
            factory,
            endpoint,
            config.connect_retry_interval,
            config.connect_retry_budget,
        ));

        let registration = Arc::new(RegistrationCoordinator::new(
            connection.clone(),
            identity.clone(),
            config.heartbeat_ttl(),
            AccessCredentials {
                username: config.access_username.clone(),
                password: config.access_password.clone(),
            },
        ));

        Ok(Self {
            checks: CheckStateMachine::new(connection.clone(), registration.clone()),
            bootstrapper: ConfigBootstrapper::new(
                connection.clone(),
                base_key.clone(),
                config.config_read_wait,
                config.override_policy,
            ),
            kv: KvTemplate::new(connection.clone(), base_key.clone()),
            lock: DistributedLock::new(connection.clone(), &base_key, config.lock_session_ttl),
            catalog: CatalogResolver::new(connection.clone()),
            heartbeat_rate: config.heartbeat_rate,
            identity,
            connection,
            registration,
        })
    }

    /// Register this process. A failure here should abort startup.
    pub async fn start(&self) -> Result<RegistrationOutcome> {
        info!(
            service_id = %self.identity.service_id,
            service_name = %self.identity.service_name,
            address = %self.identity.address,
            port = self.identity.port,
            "Registering service"
        );
        self.registration.ensure_registered().await
    }

    pub async fn bootstrap_config<T: Serialize + ?Sized>(
        &self,
        defaults: &T,
        version: &str,
    ) -> Result<BootstrapOutcome> {
        self.bootstrapper.bootstrap(defaults, version).await
    }

    pub fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        spawn_heartbeat_loop(self.checks.clone(), self.heartbeat_rate)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.registration.deregister().await
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn connection(&self) -> &Arc<BackendConnection> {
        &self.connection
    }

    pub fn checks(&self) -> &CheckStateMachine {
        &self.checks
    }

    pub fn kv(&self) -> &KvTemplate {
        &self.kv
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn catalog(&self) -> &CatalogResolver {
        &self.catalog
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{CoordinationBackend, InMemoryBackend, InMemoryFactory};
    use consulate_core::{CheckState, CoordinationError};
    use serde_json::json;

    pub(crate) fn config() -> AgentConfig {
        AgentConfig {
            service_id: "orders-1".to_string(),
            service_name: "orders".to_string(),
            tags: vec!["v1".to_string()],
            service_port: 8080,
            heartbeat_rate: Duration::from_secs(900),
            connect_retry_interval: Duration::from_millis(10),
            connect_retry_budget: Duration::from_millis(50),
            ..AgentConfig::default()
        }
    }

    pub(crate) fn agent(backend: &InMemoryBackend) -> Agent {
        Agent::new(
            &config(),
            Arc::new(InMemoryFactory::new(backend.clone())),
            "memory",
            &StaticAddressResolver::new("10.0.0.7", "node-a"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let backend = InMemoryBackend::new();
        let agent = agent(&backend);

        assert_eq!(agent.start().await.unwrap(), RegistrationOutcome::Registered);
        let services = backend.registered_services().await;
        assert_eq!(services[0].check.ttl, Duration::from_secs(1800));

        assert_eq!(
            agent.bootstrap_config(&json!({ "pool": 4 }), "v1").await.unwrap(),
            BootstrapOutcome::Written
        );
        assert_eq!(
            agent.kv().find("config/current-version").await.as_deref(),
            Some("v1")
        );

        agent
            .checks()
            .pass("db", Duration::from_secs(60), None)
            .wait()
            .await
            .unwrap();
        assert_eq!(
            backend.check_state("orders-1-db@node-a:8080").await,
            Some(CheckState::Pass)
        );

        let handle = agent.lock().acquire().await.unwrap();
        assert!(agent.lock().release(&handle).await);

        assert_eq!(
            agent
                .catalog()
                .resolve_by_name_as_cluster_definition("orders")
                .await
                .unwrap(),
            "10.0.0.7:8080"
        );

        agent.shutdown().await.unwrap();
        assert!(!backend
            .is_registered("orders-1-heartbeat@node-a:8080")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let backend = InMemoryBackend::new();
        let config = AgentConfig {
            service_id: String::new(),
            ..config()
        };

        let result = Agent::new(
            &config,
            Arc::new(InMemoryFactory::new(backend)),
            "memory",
            &StaticAddressResolver::new("10.0.0.7", "node-a"),
        );
        assert!(matches!(result, Err(CoordinationError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_oversized_heartbeat_rate_is_rejected() {
        let config = AgentConfig {
            heartbeat_rate: Duration::from_secs(u64::MAX),
            ..config()
        };

        let result = Agent::new(
            &config,
            Arc::new(InMemoryFactory::new(InMemoryBackend::new())),
            "memory",
            &StaticAddressResolver::new("10.0.0.7", "node-a"),
        );
        assert!(matches!(result, Err(CoordinationError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_fails_when_backend_down() {
        let backend = InMemoryBackend::new();
        backend.set_available(false).await;

        let err = agent(&backend).start().await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
