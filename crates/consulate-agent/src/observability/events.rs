//! Structured Events
//!
//! One function per lifecycle event so field names stay consistent.
//!
//! Event types:
//! - `service_registered` - Registration record written to the agent
//! - `service_deregistered` - Registration removed on shutdown
//! - `backend_reconnected` - Backend client rebuilt after a failed verification
//! - `backend_unavailable` - Retry budget exhausted
//! - `check_state_changed` - Named check moved between PASS and FAIL
//! - `config_bootstrapped` - Default configuration written or replaced
//! - `lock_acquired` - Distributed lock taken
//! - `lock_released` - Distributed lock given up

use tracing::{info, warn};

pub fn service_registered(registration_id: &str, address: &str, port: u16, ttl_secs: u64) {
    info!(
        event_type = "service_registered",
        registration_id = %registration_id,
        address = %address,
        port = port,
        ttl_secs = ttl_secs,
        "Service registered"
    );
}

pub fn service_deregistered(registration_id: &str) {
    info!(
        event_type = "service_deregistered",
        registration_id = %registration_id,
        "Service deregistered"
    );
}

pub fn backend_reconnected(endpoint: &str, attempt: usize) {
    info!(
        event_type = "backend_reconnected",
        endpoint = %endpoint,
        attempt = attempt,
        "Backend client rebuilt"
    );
}

pub fn backend_unavailable(endpoint: &str, budget_secs: u64, error: &str) {
    warn!(
        event_type = "backend_unavailable",
        endpoint = %endpoint,
        budget_secs = budget_secs,
        error = %error,
        "Backend unavailable after retry budget"
    );
}

pub fn check_state_changed(check_id: &str, previous_state: &str, new_state: &str) {
    info!(
        event_type = "check_state_changed",
        check_id = %check_id,
        previous_state = %previous_state,
        new_state = %new_state,
        "Check state changed"
    );
}

pub fn config_bootstrapped(base_key: &str, outcome: &str, version: &str) {
    info!(
        event_type = "config_bootstrapped",
        base_key = %base_key,
        outcome = %outcome,
        version = %version,
        "Configuration bootstrapped"
    );
}

pub fn lock_acquired(key: &str, session_id: &str) {
    info!(
        event_type = "lock_acquired",
        key = %key,
        session_id = %session_id,
        "Lock acquired"
    );
}

pub fn lock_released(key: &str, session_id: &str, released: bool) {
    info!(
        event_type = "lock_released",
        key = %key,
        session_id = %session_id,
        released = released,
        "Lock released"
    );
}
