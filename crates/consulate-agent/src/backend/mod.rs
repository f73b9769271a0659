//! Coordination Backend
//!
//! Capability interface over the backend's Status, Agent, KV, Session and
//! Catalog APIs. Any backend offering these groups is substitutable.
//!
//! This module contains:
//! - `http`: Consul HTTP v1 implementation
//! - `memory`: In-process implementation for local runs and tests

pub mod http;
pub mod memory;

pub use http::{ConsulHttpBackend, HttpBackendFactory};
pub use memory::{InMemoryBackend, InMemoryFactory};

use async_trait::async_trait;
use consulate_core::{
    CatalogService, CheckRegistration, CheckState, Result, ServiceRegistration,
};
use std::sync::Arc;
use std::time::Duration;

/// Operations the agent needs from a coordination backend.
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    // Status
    /// Current raft leader, or `None` when the cluster has no leader
    async fn leader(&self) -> Result<Option<String>>;

    // Agent
    async fn is_registered(&self, registration_id: &str) -> Result<bool>;

    async fn register_service(&self, registration: &ServiceRegistration) -> Result<()>;

    async fn deregister_service(&self, registration_id: &str) -> Result<()>;

    /// Register or update a named TTL check.
    async fn register_check(&self, check: &CheckRegistration) -> Result<()>;

    /// Set the state of a named check. Fails with `NotRegistered` for unknown checks.
    async fn update_check(&self, check_id: &str, state: CheckState, note: Option<&str>)
        -> Result<()>;

    /// Pass the service's own registration check.
    async fn pass_service(&self, registration_id: &str, note: Option<&str>) -> Result<()>;

    // KV
    /// Read a key. `wait` allows a blocking read of at most that long.
    async fn get(&self, key: &str, wait: Option<Duration>) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete a key and everything below it.
    async fn delete_tree(&self, prefix: &str) -> Result<()>;

    /// List keys under a prefix.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Try to take the lock on `key` for `session_id`. Never blocks.
    async fn acquire_lock(&self, key: &str, session_id: &str) -> Result<bool>;

    async fn release_lock(&self, key: &str, session_id: &str) -> Result<bool>;

    // Session
    async fn create_session(&self, ttl: Duration) -> Result<String>;

    async fn destroy_session(&self, session_id: &str) -> Result<()>;

    // Catalog
    async fn service_instances(&self, service_name: &str) -> Result<Vec<CatalogService>>;
}

/// Builds fresh backend handles for the reconnecting connection owner.
pub trait BackendFactory: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn CoordinationBackend>>;
}
