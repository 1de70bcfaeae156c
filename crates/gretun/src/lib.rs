//! gretun - GRE tunnel lifecycle manager
//!
//! Manages point-to-point GRE tunnel interfaces in the Linux kernel and
//! verifies that traffic flows through them:
//! - Input validation before any kernel call ([`validate`])
//! - A swappable kernel interface port ([`kernel`])
//! - Translation of kernel errors into a closed error taxonomy ([`error`])
//! - Create / delete / assign-ip / get / list with rollback ([`tunnel_mgr`])
//! - Cancellable ICMP echo health probes ([`health`])

pub mod commands;
pub mod error;
pub mod health;
pub mod kernel;
pub mod privilege;
pub mod tunnel_mgr;
pub mod types;
pub mod validate;

pub use error::{TunnelError, TunnelOp, TunnelResult};
pub use kernel::{IprouteKernel, KernelError, KernelInterface, MemoryKernel};
pub use tunnel_mgr::TunnelMgr;
pub use types::{TunnelConfig, TunnelStatus};
