//! Consulate Agent Library
//!
//! Registers a process with a Consul-style coordination backend and keeps it
//! there: heartbeat and named TTL checks, versioned configuration defaults,
//! a session-scoped distributed lock and catalog lookups by service name.

pub mod address;
pub mod agent;
pub mod api;
pub mod backend;
pub mod catalog;
pub mod checks;
pub mod config;
pub mod connection;
pub mod kv;
pub mod lock;
pub mod observability;
pub mod registration;
pub mod version;

pub use agent::Agent;
pub use config::{AgentConfig, OverridePolicy};
