//! Start-up privilege check
//!
//! GRE tunnel operations need CAP_NET_ADMIN. Root always has it; otherwise
//! the effective capability set in `/proc/self/status` is consulted.

use nix::unistd::geteuid;
use thiserror::Error;
use tracing::debug;

/// Capability number of CAP_NET_ADMIN (linux/capability.h)
pub const CAP_NET_ADMIN: u32 = 12;

const PROC_STATUS: &str = "/proc/self/status";

#[derive(Debug, Error)]
#[error("requires root privileges or CAP_NET_ADMIN capability")]
pub struct PrivilegeError;

impl PrivilegeError {
    /// Remediation text printed under the error
    pub fn hint(&self) -> &'static str {
        "Run with sudo:\n  sudo gretun [command]\n\n\
         Or grant CAP_NET_ADMIN to the binary:\n  sudo setcap cap_net_admin+ep $(which gretun)"
    }
}

/// Extract the effective capability mask from `/proc/<pid>/status` text.
pub fn parse_cap_eff(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|mask| u64::from_str_radix(mask.trim(), 16).ok())
}

/// Whether `cap` is set in a capability mask
pub fn has_capability(mask: u64, cap: u32) -> bool {
    cap < 64 && mask & (1u64 << cap) != 0
}

/// Verify the process may manage network interfaces.
pub fn check_net_admin() -> Result<(), PrivilegeError> {
    if geteuid().is_root() {
        return Ok(());
    }

    let mask = std::fs::read_to_string(PROC_STATUS)
        .ok()
        .as_deref()
        .and_then(parse_cap_eff);
    debug!(cap_eff = ?mask, "Checked effective capabilities");

    match mask {
        Some(mask) if has_capability(mask, CAP_NET_ADMIN) => Ok(()),
        _ => Err(PrivilegeError),
    }
}
