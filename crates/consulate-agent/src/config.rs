//! Agent Configuration
//!
//! Settings passed into the agent as a plain struct, with environment variable
//! overrides on top of sensible defaults.

use consulate_core::{CoordinationError, Result};
use std::time::Duration;

/// Default heartbeat rate, in seconds
pub const DEFAULT_HEARTBEAT_RATE_SECS: u64 = 900;

/// What to do when stored configuration exists under a different version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverridePolicy {
    /// Back up and replace stored configuration when the version tag differs
    #[default]
    OnVersionChange,
    /// Never replace stored configuration once it exists
    Never,
}

impl OverridePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "on-version-change" | "version" => Some(OverridePolicy::OnVersionChange),
            "never" | "false" => Some(OverridePolicy::Never),
            _ => None,
        }
    }
}

/// Agent configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Backend location
    /// Coordination backend hostname (env: CONSUL_HOST)
    pub consul_host: String,

    /// Coordination backend HTTP port (env: CONSUL_HTTP_PORT)
    pub consul_http_port: u16,

    // Service identity
    /// Service id (env: SERVICE_ID)
    pub service_id: String,

    /// Service name, should be DNS resolvable (env: SERVICE_NAME)
    pub service_name: String,

    /// Tags published with the registration (env: SERVICE_TAGS, comma-separated)
    pub tags: Vec<String>,

    /// Port the hosting application serves on (env: SERVER_PORT)
    pub service_port: u16,

    /// Address to advertise instead of the detected one (env: ADVERTISE_ADDRESS)
    pub advertise_address: Option<String>,

    /// Hostname override, defaults to the system hostname
    pub hostname: Option<String>,

    // Access record credentials
    /// (env: ACCESS_USERNAME)
    pub access_username: Option<String>,

    /// (env: ACCESS_PASSWORD)
    pub access_password: Option<String>,

    // Liveness settings
    /// Heartbeat rate; the service check TTL is twice this (env: HEARTBEAT_RATE, seconds)
    pub heartbeat_rate: Duration,

    // Connection settings
    /// Fixed delay between connection verification attempts
    pub connect_retry_interval: Duration,

    /// Total time spent retrying before the backend is declared unavailable
    pub connect_retry_budget: Duration,

    /// Timeout for a single non-blocking backend request
    pub request_timeout: Duration,

    // Config bootstrap settings
    /// Maximum blocking wait when reading stored configuration
    pub config_read_wait: Duration,

    /// (env: CONFIG_OVERRIDE)
    pub override_policy: OverridePolicy,

    // Lock settings
    /// TTL of the session backing the distributed lock
    pub lock_session_ttl: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            consul_host: "127.0.0.1".to_string(),
            consul_http_port: 8500,

            service_id: String::new(),
            service_name: String::new(),
            tags: Vec::new(),
            service_port: 8080,
            advertise_address: None,
            hostname: None,

            access_username: None,
            access_password: None,

            heartbeat_rate: Duration::from_secs(DEFAULT_HEARTBEAT_RATE_SECS),

            connect_retry_interval: Duration::from_secs(1),
            connect_retry_budget: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),

            config_read_wait: Duration::from_secs(60),
            override_policy: OverridePolicy::OnVersionChange,

            lock_session_ttl: Duration::from_secs(3600),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("CONSUL_HOST") {
            config.consul_host = host;
        }

        if let Ok(port) = std::env::var("CONSUL_HTTP_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.consul_http_port = parsed;
            }
        }

        if let Ok(service_id) = std::env::var("SERVICE_ID") {
            config.service_id = service_id;
        }

        if let Ok(service_name) = std::env::var("SERVICE_NAME") {
            config.service_name = service_name;
        }

        if let Ok(tags) = std::env::var("SERVICE_TAGS") {
            config.tags = split_tags(&tags);
        }

        if let Ok(port) = std::env::var("SERVER_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.service_port = parsed;
            }
        }

        if let Ok(address) = std::env::var("ADVERTISE_ADDRESS") {
            config.advertise_address = Some(address);
        }

        if let Ok(username) = std::env::var("ACCESS_USERNAME") {
            config.access_username = Some(username);
        }

        if let Ok(password) = std::env::var("ACCESS_PASSWORD") {
            config.access_password = Some(password);
        }

        if let Ok(rate) = std::env::var("HEARTBEAT_RATE") {
            if let Ok(parsed) = rate.parse::<u64>() {
                config.heartbeat_rate = Duration::from_secs(parsed);
            }
        }

        if let Ok(policy) = std::env::var("CONFIG_OVERRIDE") {
            if let Some(parsed) = OverridePolicy::parse(&policy) {
                config.override_policy = parsed;
            }
        }

        config
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.service_id.trim().is_empty() {
            return Err(CoordinationError::Configuration(
                "service id must not be empty".to_string(),
            ));
        }
        if self.service_name.trim().is_empty() {
            return Err(CoordinationError::Configuration(
                "service name must not be empty".to_string(),
            ));
        }
        if self.heartbeat_rate.is_zero() {
            return Err(CoordinationError::Configuration(
                "heartbeat rate must be positive".to_string(),
            ));
        }
        if self.heartbeat_rate.checked_mul(2).is_none() {
            return Err(CoordinationError::Configuration(format!(
                "heartbeat rate {:?} is too large",
                self.heartbeat_rate
            )));
        }
        Ok(())
    }

    /// TTL of the service check: one missed heartbeat of grace.
    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_rate.saturating_mul(2)
    }

    /// Base URL of the backend HTTP API
    pub fn consul_url(&self) -> String {
        if self.consul_host.starts_with("http://") || self.consul_host.starts_with("https://") {
            format!("{}:{}", self.consul_host.trim_end_matches('/'), self.consul_http_port)
        } else {
            format!("http://{}:{}", self.consul_host, self.consul_http_port)
        }
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
