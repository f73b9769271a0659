//! Core shared types for consulate
//!
//! This crate contains the service identity, backend record models, the KV key
//! layout and the error taxonomy shared by the agent and its backends.

pub mod error;
pub mod identity;
pub mod keys;
pub mod models;

pub use error::{CoordinationError, Result};
pub use identity::{unique_check_name, ServiceIdentity, HEARTBEAT_CHECK};
pub use models::{
    AccessRecord, CatalogService, CheckRegistration, CheckState, LockHandle, ServiceRegistration,
    TtlCheck,
};
