//! Records exchanged with the coordination backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serializes a TTL as the backend's `"<secs>s"` string form.
///
/// Sub-second remainders round up, and the minimum is one second.
pub mod ttl_format {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn to_string(ttl: Duration) -> String {
        let mut secs = ttl.as_secs();
        if ttl.subsec_nanos() > 0 {
            secs += 1;
        }
        format!("{}s", secs.max(1))
    }

    pub fn parse(value: &str) -> Option<Duration> {
        let value = value.trim();
        if let Some(ms) = value.strip_suffix("ms") {
            return ms.parse().ok().map(Duration::from_millis);
        }
        if let Some(m) = value.strip_suffix('m') {
            return m.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
        }
        value
            .strip_suffix('s')
            .unwrap_or(value)
            .parse()
            .ok()
            .map(Duration::from_secs)
    }

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_string(*ttl))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid ttl: {raw}")))
    }
}

/// State a check can be set to on the backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "UPPERCASE")]
pub enum CheckState {
    Pass,
    Fail,
}

impl CheckState {
    /// Path segment of the agent check-update endpoint.
    pub fn endpoint(&self) -> &'static str {
        match self {
            CheckState::Pass => "pass",
            CheckState::Fail => "fail",
        }
    }
}

/// TTL check embedded in a service registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlCheck {
    #[serde(rename = "TTL", with = "ttl_format")]
    pub ttl: Duration,
}

/// Service registration record written to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Check")]
    pub check: TtlCheck,
}

/// Named TTL check bound to a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "TTL", with = "ttl_format")]
    pub ttl: Duration,
    #[serde(rename = "Notes", skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
}

/// One service instance as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogService {
    #[serde(rename = "Node", default)]
    pub node: String,
    /// Node address, used when the service does not advertise its own
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "ServiceName")]
    pub service_name: String,
    #[serde(rename = "ServiceAddress", default)]
    pub service_address: String,
    #[serde(rename = "ServicePort")]
    pub service_port: u16,
    #[serde(rename = "ServiceTags", default)]
    pub service_tags: Vec<String>,
}

impl CatalogService {
    pub fn effective_address(&self) -> &str {
        if self.service_address.is_empty() {
            &self.address
        } else {
            &self.service_address
        }
    }

    /// `address:port` form used in cluster definitions.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.effective_address(), self.service_port)
    }
}

/// Advertised access entry written under `{serviceName}/access/{hostname}:{port}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Handle returned by a successful lock acquisition.
///
/// Only the holder of `session_id` can release the lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockHandle {
    pub session_id: String,
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_formatting_rounds_up() {
        assert_eq!(ttl_format::to_string(Duration::from_secs(1800)), "1800s");
        assert_eq!(ttl_format::to_string(Duration::from_millis(1500)), "2s");
        assert_eq!(ttl_format::to_string(Duration::from_millis(10)), "1s");
        assert_eq!(ttl_format::to_string(Duration::ZERO), "1s");
    }

    #[test]
    fn test_ttl_parsing() {
        assert_eq!(ttl_format::parse("30s"), Some(Duration::from_secs(30)));
        assert_eq!(ttl_format::parse("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(ttl_format::parse("2m"), Some(Duration::from_secs(120)));
        assert_eq!(ttl_format::parse("soon"), None);
    }

    #[test]
    fn test_registration_wire_shape() {
        let registration = ServiceRegistration {
            id: "orders-1-heartbeat@node-a:8080".to_string(),
            name: "orders".to_string(),
            tags: vec!["v1".to_string()],
            address: "10.0.0.7".to_string(),
            port: 8080,
            check: TtlCheck {
                ttl: Duration::from_secs(1800),
            },
        };

        let json = serde_json::to_value(&registration).unwrap();
        assert_eq!(json["ID"], "orders-1-heartbeat@node-a:8080");
        assert_eq!(json["Check"]["TTL"], "1800s");
        assert_eq!(json["Port"], 8080);
    }

    #[test]
    fn test_check_registration_omits_empty_notes() {
        let check = CheckRegistration {
            id: "orders-1-db@node-a:8080".to_string(),
            name: "orders db".to_string(),
            service_id: "orders-1-heartbeat@node-a:8080".to_string(),
            ttl: Duration::from_secs(60),
            notes: None,
        };

        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["ServiceID"], "orders-1-heartbeat@node-a:8080");
        assert_eq!(json["TTL"], "60s");
        assert!(json.get("Notes").is_none());
    }

    #[test]
    fn test_catalog_service_decodes_and_falls_back_to_node_address() {
        let raw = r#"{
            "Node": "node-a",
            "Address": "10.0.0.1",
            "ServiceID": "rabbit-1",
            "ServiceName": "rabbit",
            "ServiceAddress": "",
            "ServicePort": 5672,
            "ServiceTags": ["amqp"]
        }"#;

        let service: CatalogService = serde_json::from_str(raw).unwrap();
        assert_eq!(service.endpoint(), "10.0.0.1:5672");
    }

    #[test]
    fn test_check_state_display() {
        assert_eq!(CheckState::Pass.to_string(), "PASS");
        assert_eq!(CheckState::Fail.endpoint(), "fail");
    }
}
