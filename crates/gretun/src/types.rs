//! Tunnel type definitions and constants

use std::net::IpAddr;

use serde::Serialize;

use crate::kernel::GreAttrs;

/// Link kind reported by the kernel for GRE tunnels
pub const GRE_KIND: &str = "gre";

/// TTL written to the kernel when the caller leaves it at 0
pub const DEFAULT_TTL: u8 = 64;

/// Kernel interface-name limit (IFNAMSIZ - 1)
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Configuration for a GRE tunnel, built by the caller before create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Interface name
    pub name: String,
    /// Local endpoint
    pub local_address: IpAddr,
    /// Remote endpoint
    pub remote_address: IpAddr,
    /// GRE key used for both directions (0 = unset)
    pub key: u32,
    /// Encapsulation TTL (0 = use [`DEFAULT_TTL`])
    pub ttl: u8,
}

impl TunnelConfig {
    /// Create a config with no key and the default TTL
    pub fn new(name: impl Into<String>, local_address: IpAddr, remote_address: IpAddr) -> Self {
        Self {
            name: name.into(),
            local_address,
            remote_address,
            key: 0,
            ttl: 0,
        }
    }

    /// Set the GRE key (builder pattern)
    pub fn with_key(mut self, key: u32) -> Self {
        self.key = key;
        self
    }

    /// Set the TTL (builder pattern)
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// TTL to send to the kernel, with the 0 sentinel resolved
    pub fn effective_ttl(&self) -> u8 {
        if self.ttl == 0 {
            DEFAULT_TTL
        } else {
            self.ttl
        }
    }
}

/// Snapshot of a GRE tunnel, rebuilt from kernel state on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub name: String,
    pub local_address: Option<IpAddr>,
    pub remote_address: Option<IpAddr>,
    pub key: u32,
    pub ttl: u8,
    pub is_up: bool,
    /// First address assigned to the interface, in CIDR notation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_address: Option<String>,
}

impl TunnelStatus {
    /// Build a status from a link's GRE attributes
    pub fn from_gre(
        name: impl Into<String>,
        gre: &GreAttrs,
        is_up: bool,
        tunnel_address: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            local_address: gre.local.map(IpAddr::V4),
            remote_address: gre.remote.map(IpAddr::V4),
            key: gre.ikey,
            ttl: gre.ttl,
            is_up,
            tunnel_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_tunnel_config_builder() {
        let config = TunnelConfig::new(
            "tun0",
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
        )
        .with_key(42)
        .with_ttl(128);

        assert_eq!(config.name, "tun0");
        assert_eq!(config.key, 42);
        assert_eq!(config.ttl, 128);
        assert_eq!(config.effective_ttl(), 128);
    }

    #[test]
    fn test_zero_ttl_resolves_to_default() {
        let config = TunnelConfig::new(
            "tun0",
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
        );
        assert_eq!(config.ttl, 0);
        assert_eq!(config.effective_ttl(), DEFAULT_TTL);
    }

    #[test]
    fn test_status_json_field_names() {
        let gre = GreAttrs {
            local: Some(Ipv4Addr::new(10, 0, 0, 1)),
            remote: Some(Ipv4Addr::new(10, 0, 0, 2)),
            ikey: 7,
            okey: 7,
            ttl: 64,
        };
        let status = TunnelStatus::from_gre("tun0", &gre, true, None);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["name"], "tun0");
        assert_eq!(json["localAddress"], "10.0.0.1");
        assert_eq!(json["remoteAddress"], "10.0.0.2");
        assert_eq!(json["key"], 7);
        assert_eq!(json["ttl"], 64);
        assert_eq!(json["isUp"], true);
        assert!(json.get("tunnelAddress").is_none());
    }

    #[test]
    fn test_status_wildcard_endpoint_is_null() {
        let gre = GreAttrs {
            local: None,
            remote: Some(Ipv4Addr::new(10, 0, 0, 2)),
            ..GreAttrs::default()
        };
        let status =
            TunnelStatus::from_gre("tun1", &gre, false, Some("192.168.1.1/30".to_string()));
        let json = serde_json::to_value(&status).unwrap();

        assert!(json["localAddress"].is_null());
        assert_eq!(json["tunnelAddress"], "192.168.1.1/30");
    }
}
