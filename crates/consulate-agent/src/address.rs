//! Local address resolution.
//!
//! Supplies the non-loopback address advertised in the service registration
//! and the hostname used in unique check names.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Documentation-only address; connecting a UDP socket to it sends nothing.
const PROBE_TARGET: &str = "192.0.2.1:80";

pub trait AddressResolver: Send + Sync {
    /// Non-loopback address of this process
    fn local_address(&self) -> String;

    fn hostname(&self) -> String;
}

/// Resolve the system hostname, falling back to `localhost`.
pub fn system_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn is_usable(ip: &IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}

/// Detects the address from the host's routing table, cached after first use.
#[derive(Debug, Default)]
pub struct LocalAddressResolver {
    hostname: Option<String>,
    cached: OnceLock<String>,
}

impl LocalAddressResolver {
    pub fn new(hostname: Option<String>) -> Self {
        Self {
            hostname,
            cached: OnceLock::new(),
        }
    }

    fn outbound_route_ip() -> Option<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(PROBE_TARGET).ok()?;
        let ip = socket.local_addr().ok()?.ip();
        is_usable(&ip).then_some(ip)
    }

    fn resolve_hostname(hostname: &str) -> Option<IpAddr> {
        (hostname, 0)
            .to_socket_addrs()
            .ok()?
            .map(|addr| addr.ip())
            .find(|ip| ip.is_ipv4() && is_usable(ip))
    }

    fn detect(&self) -> String {
        if let Some(ip) = Self::outbound_route_ip() {
            debug!(address = %ip, "Detected local address from routing table");
            return ip.to_string();
        }

        let hostname = self.hostname();
        if let Some(ip) = Self::resolve_hostname(&hostname) {
            debug!(address = %ip, hostname = %hostname, "Resolved local address from hostname");
            return ip.to_string();
        }

        warn!("No non-loopback address found, advertising 127.0.0.1");
        Ipv4Addr::LOCALHOST.to_string()
    }
}

impl AddressResolver for LocalAddressResolver {
    fn local_address(&self) -> String {
        self.cached.get_or_init(|| self.detect()).clone()
    }

    fn hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(system_hostname)
    }
}

/// Always reports a configured address.
#[derive(Debug, Clone)]
pub struct StaticAddressResolver {
    address: String,
    hostname: String,
}

impl StaticAddressResolver {
    pub fn new(address: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            hostname: hostname.into(),
        }
    }
}

impl AddressResolver for StaticAddressResolver {
    fn local_address(&self) -> String {
        self.address.clone()
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_resolver() {
        let resolver = StaticAddressResolver::new("10.0.0.7", "node-a");
        assert_eq!(resolver.local_address(), "10.0.0.7");
        assert_eq!(resolver.hostname(), "node-a");
    }

    #[test]
    fn test_local_resolver_is_stable() {
        let resolver = LocalAddressResolver::new(Some("node-a".to_string()));
        let first = resolver.local_address();
        assert!(!first.is_empty());
        assert!(first.parse::<IpAddr>().is_ok());
        assert_eq!(resolver.local_address(), first);
        assert_eq!(resolver.hostname(), "node-a");
    }

    #[test]
    fn test_loopback_is_not_usable() {
        assert!(!is_usable(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!is_usable(&IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
        assert!(is_usable(&"10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_system_hostname_is_not_empty() {
        assert!(!system_hostname().is_empty());
    }
}
