//! Kernel interface port
//!
//! [`KernelInterface`] is the only path from tunnel logic to the kernel's
//! interface table. [`IprouteKernel`] drives the real kernel through
//! iproute2; [`MemoryKernel`] keeps an in-memory table for tests.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use gretun_common::ShellError;
use ipnet::{IpNet, Ipv4Net};
use nix::errno::Errno;
use thiserror::Error;

mod iproute;
mod memory;

pub use iproute::{errno_from_output, parse_addresses, parse_links, IprouteKernel};
pub use memory::{KernelCall, MemoryKernel};

/// Result type alias for kernel calls.
pub type KernelResult<T> = Result<T, KernelError>;

/// Raw failure of a kernel call, before translation.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The kernel answered with an errno.
    #[error("{detail} ({errno})")]
    Os { errno: Errno, detail: String },

    /// `ip` could not be run, or failed without a recognisable errno in
    /// its diagnostics.
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// Kernel output could not be decoded.
    #[error("malformed kernel output: {detail}")]
    Malformed { detail: String },
}

impl KernelError {
    /// Creates an errno-carrying error.
    pub fn os(errno: Errno, detail: impl Into<String>) -> Self {
        Self::Os {
            errno,
            detail: detail.into(),
        }
    }

    /// Returns the errno behind this failure, if any.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            KernelError::Os { errno, .. } => Some(*errno),
            KernelError::Shell(_) | KernelError::Malformed { .. } => None,
        }
    }
}

/// GRE-specific link attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GreAttrs {
    /// Local endpoint (`None` = any)
    pub local: Option<Ipv4Addr>,
    /// Remote endpoint (`None` = any)
    pub remote: Option<Ipv4Addr>,
    /// Inbound key
    pub ikey: u32,
    /// Outbound key
    pub okey: u32,
    /// Encapsulation TTL (0 = inherit)
    pub ttl: u8,
}

/// An interface as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    /// Link kind (`gre`, `veth`, ...); `device` for physical interfaces
    pub kind: String,
    pub is_up: bool,
    /// Present only when the kernel reported GRE attributes
    pub gre: Option<GreAttrs>,
}

impl Link {
    /// Returns true if the kernel reports this link as GRE.
    pub fn is_gre(&self) -> bool {
        self.kind == crate::types::GRE_KIND
    }
}

/// Descriptor for a new GRE interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreLinkSpec {
    pub name: String,
    pub local: Ipv4Addr,
    pub remote: Ipv4Addr,
    pub ikey: u32,
    pub okey: u32,
    pub ttl: u8,
}

impl GreLinkSpec {
    /// Attributes the kernel will report for this link once created.
    pub fn attrs(&self) -> GreAttrs {
        GreAttrs {
            local: Some(self.local),
            remote: Some(self.remote),
            ikey: self.ikey,
            okey: self.okey,
            ttl: self.ttl,
        }
    }
}

/// Capability set over the kernel interface table.
///
/// Implementations hold no business logic: each method is one kernel call
/// that returns the data or the raw failure.
#[async_trait]
pub trait KernelInterface: Send + Sync {
    /// Creates a GRE interface.
    async fn add_link(&self, spec: &GreLinkSpec) -> KernelResult<()>;

    /// Deletes an interface by name.
    async fn delete_link(&self, name: &str) -> KernelResult<()>;

    /// Looks up an interface; `Ok(None)` when no such device exists.
    async fn find_link_by_name(&self, name: &str) -> KernelResult<Option<Link>>;

    /// Sets an interface administratively up.
    async fn bring_link_up(&self, name: &str) -> KernelResult<()>;

    /// Lists every interface.
    async fn list_links(&self) -> KernelResult<Vec<Link>>;

    /// Adds an IPv4 address to an interface.
    async fn add_address(&self, name: &str, addr: Ipv4Net) -> KernelResult<()>;

    /// Lists the addresses of an interface, in kernel order.
    async fn list_addresses(&self, name: &str) -> KernelResult<Vec<IpNet>>;
}
