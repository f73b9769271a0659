//! Service Identity
//!
//! The immutable per-process identity used to derive the registration record,
//! every unique check name and the KV base key.

use serde::{Deserialize, Serialize};

/// Logical name of the service's own registration-level check.
pub const HEARTBEAT_CHECK: &str = "heartbeat";

/// Identity of this process as a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub service_id: String,
    pub service_name: String,
    pub tags: Vec<String>,
    /// Advertised non-loopback address
    pub address: String,
    pub port: u16,
    /// Local hostname, used to disambiguate check names between hosts
    pub hostname: String,
}

impl ServiceIdentity {
    /// KV namespace prefix under which config and lock keys live.
    pub fn base_key(&self) -> String {
        format!("{}/{}", self.service_name, self.service_id)
    }

    /// Unique backend name for a logical check name.
    pub fn unique_name(&self, logical_name: &str) -> String {
        unique_check_name(&self.service_id, logical_name, &self.hostname, self.port)
    }

    /// Id of the service registration, which is also the heartbeat check name.
    pub fn registration_id(&self) -> String {
        self.unique_name(HEARTBEAT_CHECK)
    }

    /// Display name given to a named check in the backend UI.
    pub fn check_display_name(&self, logical_name: &str) -> String {
        format!("{} {}", self.service_name, logical_name)
    }
}

/// `serviceId-logicalName@hostname:port`
pub fn unique_check_name(service_id: &str, logical_name: &str, hostname: &str, port: u16) -> String {
    format!("{service_id}-{logical_name}@{hostname}:{port}")
}
