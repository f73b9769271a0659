//! In-process coordination backend.
//!
//! Used when no coordination backend is deployed and as the test double for
//! every component. Sessions expire after their TTL and release their locks,
//! TTL checks report `Fail` once their TTL lapses without an update.

use super::{BackendFactory, CoordinationBackend};
use async_trait::async_trait;
use consulate_core::{
    CatalogService, CheckRegistration, CheckState, CoordinationError, Result,
    ServiceRegistration,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Node name reported for locally registered services
const LOCAL_NODE: &str = "local";

#[derive(Debug, Clone)]
struct CheckRecord {
    service_id: String,
    ttl: Duration,
    state: Option<CheckState>,
    note: Option<String>,
    updated_at: Instant,
}

impl CheckRecord {
    fn new(service_id: String, ttl: Duration) -> Self {
        Self {
            service_id,
            ttl,
            state: None,
            note: None,
            updated_at: Instant::now(),
        }
    }

    /// Effective state, failing once the TTL has lapsed.
    fn effective_state(&self) -> Option<CheckState> {
        if self.updated_at.elapsed() > self.ttl {
            Some(CheckState::Fail)
        } else {
            self.state
        }
    }

    fn set(&mut self, state: CheckState, note: Option<&str>) {
        self.state = Some(state);
        self.note = note.map(String::from);
        self.updated_at = Instant::now();
    }
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    session: Option<String>,
}

#[derive(Debug)]
struct State {
    available: bool,
    services: BTreeMap<String, ServiceRegistration>,
    service_checks: HashMap<String, CheckRecord>,
    checks: HashMap<String, CheckRecord>,
    kv: BTreeMap<String, KvEntry>,
    sessions: HashMap<String, Instant>,
    catalog: Vec<CatalogService>,
    registration_writes: usize,
    failing_reads: HashSet<String>,
    failing_acquires: HashSet<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            available: true,
            services: BTreeMap::new(),
            service_checks: HashMap::new(),
            checks: HashMap::new(),
            kv: BTreeMap::new(),
            sessions: HashMap::new(),
            catalog: Vec::new(),
            registration_writes: 0,
            failing_reads: HashSet::new(),
            failing_acquires: HashSet::new(),
        }
    }
}

impl State {
    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(CoordinationError::BackendUnavailable(
                "in-memory backend is offline".to_string(),
            ))
        }
    }

    /// Drop expired sessions and release the locks they held.
    fn expire_sessions(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in expired {
            trace!(session_id = %session_id, "Session expired");
            self.invalidate_session(&session_id);
        }
    }

    fn invalidate_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        for entry in self.kv.values_mut() {
            if entry.session.as_deref() == Some(session_id) {
                entry.session = None;
            }
        }
    }
}

/// Shared in-process backend. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
    }

    /// Simulate backend data loss: all registrations, checks, keys and sessions vanish.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let available = state.available;
        let catalog = std::mem::take(&mut state.catalog);
        *state = State {
            available,
            catalog,
            ..State::default()
        };
        debug!("In-memory backend reset");
    }

    /// Make every read of `key` fail while the rest of the backend stays up.
    pub async fn fail_reads_of(&self, key: &str) {
        self.state.lock().await.failing_reads.insert(key.to_string());
    }

    /// Make every lock acquisition on `key` fail with a protocol error.
    pub async fn fail_lock_acquires_of(&self, key: &str) {
        self.state.lock().await.failing_acquires.insert(key.to_string());
    }

    /// Seed a catalog entry registered by some other node.
    pub async fn add_catalog_service(&self, service: CatalogService) {
        self.state.lock().await.catalog.push(service);
    }

    /// Number of service registration records written so far.
    pub async fn registration_writes(&self) -> usize {
        self.state.lock().await.registration_writes
    }

    pub async fn registered_services(&self) -> Vec<ServiceRegistration> {
        self.state.lock().await.services.values().cloned().collect()
    }

    /// Effective state of a named check.
    pub async fn check_state(&self, check_id: &str) -> Option<CheckState> {
        self.state
            .lock()
            .await
            .checks
            .get(check_id)
            .and_then(CheckRecord::effective_state)
    }

    pub async fn check_note(&self, check_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .checks
            .get(check_id)
            .and_then(|c| c.note.clone())
    }

    pub async fn check_ttl(&self, check_id: &str) -> Option<Duration> {
        self.state.lock().await.checks.get(check_id).map(|c| c.ttl)
    }

    /// Effective state of a service's own registration check.
    pub async fn service_check_state(&self, registration_id: &str) -> Option<CheckState> {
        self.state
            .lock()
            .await
            .service_checks
            .get(registration_id)
            .and_then(CheckRecord::effective_state)
    }

    /// Force a session to expire as if its TTL had lapsed.
    pub async fn expire_session(&self, session_id: &str) {
        self.state.lock().await.invalidate_session(session_id);
    }

    pub async fn session_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.expire_sessions();
        state.sessions.len()
    }

    /// Session currently holding the lock on `key`.
    pub async fn lock_holder(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state.expire_sessions();
        state.kv.get(key).and_then(|e| e.session.clone())
    }
}

#[async_trait]
impl CoordinationBackend for InMemoryBackend {
    async fn leader(&self) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.available.then(|| "127.0.0.1:8300".to_string()))
    }

    async fn is_registered(&self, registration_id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.services.contains_key(registration_id))
    }

    async fn register_service(&self, registration: &ServiceRegistration) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.registration_writes += 1;
        state.service_checks.insert(
            registration.id.clone(),
            CheckRecord::new(registration.id.clone(), registration.check.ttl),
        );
        state
            .services
            .insert(registration.id.clone(), registration.clone());
        debug!(registration_id = %registration.id, "Service registered");
        Ok(())
    }

    async fn deregister_service(&self, registration_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.services.remove(registration_id);
        state.service_checks.remove(registration_id);
        state.checks.retain(|_, c| c.service_id != registration_id);
        Ok(())
    }

    async fn register_check(&self, check: &CheckRegistration) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        if !state.services.contains_key(&check.service_id) {
            return Err(CoordinationError::NotRegistered(format!(
                "service {} is not registered",
                check.service_id
            )));
        }
        let record = state
            .checks
            .entry(check.id.clone())
            .or_insert_with(|| CheckRecord::new(check.service_id.clone(), check.ttl));
        record.ttl = check.ttl;
        record.service_id = check.service_id.clone();
        Ok(())
    }

    async fn update_check(
        &self,
        check_id: &str,
        check_state: CheckState,
        note: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let record = state
            .checks
            .get_mut(check_id)
            .ok_or_else(|| CoordinationError::NotRegistered(format!("unknown check {check_id}")))?;
        record.set(check_state, note);
        Ok(())
    }

    async fn pass_service(&self, registration_id: &str, note: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let record = state.service_checks.get_mut(registration_id).ok_or_else(|| {
            CoordinationError::NotRegistered(format!("unknown service {registration_id}"))
        })?;
        record.set(CheckState::Pass, note);
        Ok(())
    }

    async fn get(&self, key: &str, _wait: Option<Duration>) -> Result<Option<String>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        if state.failing_reads.contains(key) {
            return Err(CoordinationError::BackendProtocol(format!(
                "read of {key} failed"
            )));
        }
        Ok(state.kv.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let entry = state.kv.entry(key.to_string()).or_insert(KvEntry {
            value: String::new(),
            session: None,
        });
        entry.value = value.to_string();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.kv.remove(key);
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.kv.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state
            .kv
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn acquire_lock(&self, key: &str, session_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.expire_sessions();

        if !state.sessions.contains_key(session_id) {
            return Err(CoordinationError::BackendProtocol(format!(
                "invalid session {session_id}"
            )));
        }
        if state.failing_acquires.contains(key) {
            return Err(CoordinationError::BackendProtocol(format!(
                "acquire of {key} failed"
            )));
        }

        let entry = state.kv.entry(key.to_string()).or_insert(KvEntry {
            value: String::new(),
            session: None,
        });
        match entry.session.as_deref() {
            Some(holder) if holder != session_id => Ok(false),
            _ => {
                entry.session = Some(session_id.to_string());
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str, session_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.expire_sessions();

        match state.kv.get_mut(key) {
            Some(entry) if entry.session.as_deref() == Some(session_id) => {
                entry.session = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_session(&self, ttl: Duration) -> Result<String> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let session_id = uuid::Uuid::new_v4().to_string();
        state
            .sessions
            .insert(session_id.clone(), Instant::now() + ttl);
        Ok(session_id)
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.invalidate_session(session_id);
        Ok(())
    }

    async fn service_instances(&self, service_name: &str) -> Result<Vec<CatalogService>> {
        let state = self.state.lock().await;
        state.ensure_available()?;

        let local = state
            .services
            .values()
            .filter(|s| s.name == service_name)
            .map(|s| CatalogService {
                node: LOCAL_NODE.to_string(),
                address: s.address.clone(),
                service_id: s.id.clone(),
                service_name: s.name.clone(),
                service_address: s.address.clone(),
                service_port: s.port,
                service_tags: s.tags.clone(),
            });

        let seeded = state
            .catalog
            .iter()
            .filter(|s| s.service_name == service_name)
            .cloned();

        Ok(local.chain(seeded).collect())
    }
}

/// Factory handing out the same shared in-memory backend on every connect.
#[derive(Debug, Default)]
pub struct InMemoryFactory {
    backend: InMemoryBackend,
    connects: AtomicUsize,
}

impl InMemoryFactory {
    pub fn new(backend: InMemoryBackend) -> Self {
        Self {
            backend,
            connects: AtomicUsize::new(0),
        }
    }

    /// Number of handles built so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }
}

impl BackendFactory for InMemoryFactory {
    fn connect(&self) -> Result<Arc<dyn CoordinationBackend>> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(self.backend.clone()))
    }
}
