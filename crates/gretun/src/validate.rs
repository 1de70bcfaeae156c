//! Input validation for tunnel operations.
//!
//! All checks are pure and run before any kernel call, so bad input never
//! causes a partial mutation.

use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{TunnelError, TunnelResult};
use crate::types::{TunnelConfig, MAX_INTERFACE_NAME_LEN};

/// Interface name prefixes owned by the system (loopback, NICs, wireless,
/// container bridges and veth pairs).
pub const RESERVED_PREFIXES: &[&str] = &["lo", "eth", "wlan", "docker", "veth", "br-", "virbr"];

static INTERFACE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex pattern"));

/// Validates a tunnel interface name.
pub fn validate_name(name: &str) -> TunnelResult<()> {
    if name.is_empty() {
        return Err(TunnelError::validation(
            "name",
            name,
            "tunnel name cannot be empty",
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(TunnelError::validation(
            "name",
            name,
            format!(
                "exceeds maximum length of {} characters (got {})",
                MAX_INTERFACE_NAME_LEN,
                name.len()
            ),
        ));
    }

    if !INTERFACE_NAME_RE.is_match(name) {
        return Err(TunnelError::validation(
            "name",
            name,
            "contains invalid characters (only alphanumeric, hyphens, and underscores allowed)",
        ));
    }

    if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| name.starts_with(*p)) {
        return Err(TunnelError::validation(
            "name",
            name,
            format!(
                "uses reserved prefix {:?} which may conflict with system interfaces",
                prefix
            ),
        ));
    }

    Ok(())
}

/// Validates a tunnel endpoint address. `field` labels the error.
pub fn validate_address(ip: IpAddr, field: &str) -> TunnelResult<()> {
    let value = ip.to_string();

    if ip.is_unspecified() {
        return Err(TunnelError::validation(
            field,
            value,
            format!("{} cannot be unspecified", field),
        ));
    }

    if ip.is_loopback() {
        return Err(TunnelError::validation(
            field,
            value,
            format!("{} cannot be a loopback address", field),
        ));
    }

    if !ip.is_ipv4() {
        return Err(TunnelError::validation(
            field,
            value,
            format!("{} must be an IPv4 address", field),
        ));
    }

    if ip.is_multicast() {
        return Err(TunnelError::validation(
            field,
            value,
            format!("{} cannot be a multicast address", field),
        ));
    }

    Ok(())
}

/// Validates an address in CIDR notation and returns it parsed.
///
/// The subnet's network and broadcast addresses are rejected; for /31 and
/// /32 every address is one of the two, so those prefixes never pass.
pub fn validate_cidr(cidr: &str) -> TunnelResult<Ipv4Net> {
    if cidr.is_empty() {
        return Err(TunnelError::validation("cidr", cidr, "CIDR cannot be empty"));
    }

    let net: IpNet = cidr.parse().map_err(|e| {
        TunnelError::validation("cidr", cidr, format!("invalid CIDR notation: {}", e))
    })?;

    let IpNet::V4(net) = net else {
        return Err(TunnelError::validation(
            "cidr",
            cidr,
            "CIDR is not an IPv4 address",
        ));
    };

    if net.addr() == net.network() {
        return Err(TunnelError::validation(
            "cidr",
            cidr,
            "uses network address (first address in subnet), which is reserved",
        ));
    }

    if net.addr() == net.broadcast() {
        return Err(TunnelError::validation(
            "cidr",
            cidr,
            "uses broadcast address (last address in subnet), which is reserved",
        ));
    }

    Ok(net)
}

/// Validates a TTL. 0 selects the default; 1-255 is sent as-is.
pub fn validate_ttl(_ttl: u8) -> TunnelResult<()> {
    Ok(())
}

/// Validates a complete config: name, local, remote, distinct endpoints,
/// TTL, stopping at the first failure.
pub fn validate_config(config: &TunnelConfig) -> TunnelResult<()> {
    validate_name(&config.name)?;
    validate_address(config.local_address, "local IP")?;
    validate_address(config.remote_address, "remote IP")?;

    if config.local_address == config.remote_address {
        return Err(TunnelError::validation(
            "remote IP",
            config.remote_address.to_string(),
            "local IP and remote IP cannot be the same",
        ));
    }

    validate_ttl(config.ttl)
}
