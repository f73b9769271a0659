//! Application State
//!
//! Shared state passed to all API handlers.

use crate::agent::Agent;
use crate::observability::MetricsState;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub metrics_state: Option<MetricsState>,
    /// Set once registration and config bootstrap have completed
    pub readiness: Arc<AtomicBool>,
}
