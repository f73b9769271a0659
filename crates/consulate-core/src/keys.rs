//! KV key layout.
//!
//! ```text
//! {serviceName}/{serviceId}/config/current
//! {serviceName}/{serviceId}/config/current-version
//! {serviceName}/{serviceId}/config/backup-<timestamp>
//! {serviceName}/{serviceId}/lock
//! {serviceName}/access/{hostname}:{port}
//! ```

pub const CONFIG_CURRENT: &str = "config/current";
pub const CONFIG_CURRENT_VERSION: &str = "config/current-version";
pub const CONFIG_BACKUP_PREFIX: &str = "config/backup-";
pub const LOCK: &str = "lock";

pub fn config_current(base_key: &str) -> String {
    format!("{base_key}/{CONFIG_CURRENT}")
}

pub fn config_current_version(base_key: &str) -> String {
    format!("{base_key}/{CONFIG_CURRENT_VERSION}")
}

/// Prefix shared by every backup snapshot of a base key.
pub fn config_backup_prefix(base_key: &str) -> String {
    format!("{base_key}/{CONFIG_BACKUP_PREFIX}")
}

pub fn config_backup(base_key: &str, timestamp: &str) -> String {
    format!("{}{timestamp}", config_backup_prefix(base_key))
}

pub fn lock(base_key: &str) -> String {
    format!("{base_key}/{LOCK}")
}

pub fn access(service_name: &str, hostname: &str, port: u16) -> String {
    format!("{service_name}/access/{hostname}:{port}")
}

/// Join a caller-supplied relative key onto a base key.
pub fn relative(base_key: &str, key: &str) -> String {
    format!("{}/{}", base_key, key.trim_start_matches('/'))
}
