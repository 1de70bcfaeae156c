//! Tunnel error taxonomy and kernel error translation.
//!
//! Every error that leaves [`crate::TunnelMgr`] is a [`TunnelError`]. Raw
//! kernel failures are mapped by [`translate`]; the raw
//! [`KernelError`] stays attached as the source of `Operation` errors so no
//! detail is lost.

use std::fmt;

use nix::errno::Errno;
use thiserror::Error;

use crate::kernel::KernelError;

/// Result type alias for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Message attached to permission failures.
pub const PERMISSION_MESSAGE: &str = "requires CAP_NET_ADMIN capability or root privileges";

/// Tunnel manager operation, used to tag translated errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelOp {
    Create,
    Delete,
    AssignIp,
    Get,
    List,
}

impl TunnelOp {
    /// Returns the operation tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelOp::Create => "create",
            TunnelOp::Delete => "delete",
            TunnelOp::AssignIp => "assign-ip",
            TunnelOp::Get => "get",
            TunnelOp::List => "list",
        }
    }
}

impl fmt::Display for TunnelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by tunnel operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Input rejected before any kernel call.
    #[error("validation failed for {field}{}: {message}", quoted_value(.value))]
    Validation {
        field: String,
        value: String,
        message: String,
    },

    /// An interface with this name already exists.
    #[error("tunnel {name} already exists")]
    Exists { name: String },

    /// No interface with this name exists.
    #[error("tunnel {name} not found")]
    NotFound { name: String },

    /// The interface exists but is not a GRE tunnel.
    #[error("{name} is not a GRE tunnel (type: {actual_type})")]
    InvalidType { name: String, actual_type: String },

    /// The kernel refused the operation for lack of privilege.
    #[error("permission denied: {op} tunnel {name}: {message}")]
    Permission {
        op: TunnelOp,
        name: String,
        message: String,
    },

    /// Any other kernel failure, with the raw cause attached.
    #[error("{op} {}: {message}{}", subject(.name), cause_suffix(.cause))]
    Operation {
        op: TunnelOp,
        name: String,
        message: String,
        #[source]
        cause: Option<KernelError>,
    },
}

fn quoted_value(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        format!(" ({:?})", value)
    }
}

fn subject(name: &str) -> String {
    if name.is_empty() {
        "tunnels".to_string()
    } else {
        format!("tunnel {}", name)
    }
}

fn cause_suffix(cause: &Option<KernelError>) -> String {
    match cause {
        Some(cause) => format!(": {}", cause),
        None => String::new(),
    }
}

impl TunnelError {
    /// Creates a validation error.
    pub fn validation(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Creates an operation error.
    pub fn operation(
        op: TunnelOp,
        name: impl Into<String>,
        message: impl Into<String>,
        cause: Option<KernelError>,
    ) -> Self {
        Self::Operation {
            op,
            name: name.into(),
            message: message.into(),
            cause,
        }
    }

    /// Errno of the underlying kernel failure, if any.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            TunnelError::Operation { cause, .. } => cause.as_ref().and_then(KernelError::errno),
            TunnelError::Validation { .. }
            | TunnelError::Exists { .. }
            | TunnelError::NotFound { .. }
            | TunnelError::InvalidType { .. }
            | TunnelError::Permission { .. } => None,
        }
    }

    /// Returns true if a retry may succeed (busy, network down, again,
    /// timed out).
    pub fn is_transient(&self) -> bool {
        matches!(
            self.errno(),
            Some(Errno::EBUSY | Errno::ENETDOWN | Errno::EAGAIN | Errno::ETIMEDOUT)
        )
    }

    /// Returns true if a retry cannot help.
    pub fn is_fatal(&self) -> bool {
        match self {
            TunnelError::Permission { .. } | TunnelError::Validation { .. } => true,
            TunnelError::Operation { .. } => matches!(
                self.errno(),
                Some(Errno::EPERM | Errno::EACCES | Errno::EINVAL | Errno::EOPNOTSUPP)
            ),
            TunnelError::Exists { .. }
            | TunnelError::NotFound { .. }
            | TunnelError::InvalidType { .. } => false,
        }
    }

    /// Returns true if the kernel rejected the tunnel parameters.
    pub fn is_config_error(&self) -> bool {
        self.errno() == Some(Errno::EINVAL)
    }

    /// Short remediation hint for the operator, if one applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            TunnelError::Permission { .. } => Some(
                "Run with sudo or grant CAP_NET_ADMIN: sudo setcap cap_net_admin+ep $(which gretun)",
            ),
            TunnelError::Exists { .. } => Some(
                "Use 'gretun list' to see existing tunnels, or 'gretun delete --name <name>' to remove it first",
            ),
            TunnelError::NotFound { .. } => Some("Use 'gretun list' to see available tunnels"),
            TunnelError::Operation { .. } => match self.errno()? {
                Errno::EOPNOTSUPP => Some("Load the GRE kernel module: sudo modprobe ip_gre"),
                Errno::EBUSY => Some(
                    "The tunnel interface may be in use. Try bringing it down first or wait a moment",
                ),
                Errno::EINVAL => Some(
                    "Check that IP addresses are valid and reachable, and TTL is in valid range (0-255)",
                ),
                Errno::EADDRINUSE => {
                    Some("The tunnel address is already in use by another interface")
                }
                _ => None,
            },
            TunnelError::Validation { .. } | TunnelError::InvalidType { .. } => None,
        }
    }

    /// Renders the error followed by its hint, if any.
    pub fn format_with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{}\n\nHint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

/// Maps a raw kernel error onto the tunnel error taxonomy.
pub fn translate(err: KernelError, op: TunnelOp, name: &str) -> TunnelError {
    let Some(errno) = err.errno() else {
        return TunnelError::operation(op, name, "operation failed", Some(err));
    };

    let message = match errno {
        Errno::EEXIST => {
            return TunnelError::Exists {
                name: name.to_string(),
            }
        }
        Errno::ENODEV => {
            return TunnelError::NotFound {
                name: name.to_string(),
            }
        }
        Errno::EPERM | Errno::EACCES => {
            return TunnelError::Permission {
                op,
                name: name.to_string(),
                message: PERMISSION_MESSAGE.to_string(),
            }
        }
        Errno::EINVAL => "invalid configuration (check IP addresses, key, TTL)",
        Errno::EOPNOTSUPP => {
            "operation not supported (is the GRE kernel module loaded? try: modprobe ip_gre)"
        }
        Errno::EBUSY => match op {
            TunnelOp::Delete => "device busy (tunnel may be in use)",
            _ => "device or resource busy",
        },
        Errno::ENETDOWN => match op {
            TunnelOp::AssignIp => "cannot assign address: network is down",
            _ => "network is down",
        },
        Errno::EADDRINUSE => match op {
            TunnelOp::AssignIp => "address already assigned to another interface",
            _ => "address already in use",
        },
        _ => "operation failed",
    };

    TunnelError::operation(op, name, message, Some(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gretun_common::ShellError;
    use pretty_assertions::assert_eq;

    fn os(errno: Errno) -> KernelError {
        KernelError::Os {
            errno,
            detail: "RTNETLINK answers".to_string(),
        }
    }

    #[test]
    fn test_translate_fixed_table() {
        assert!(matches!(
            translate(os(Errno::EEXIST), TunnelOp::Create, "tun0"),
            TunnelError::Exists { name } if name == "tun0"
        ));
        assert!(matches!(
            translate(os(Errno::ENODEV), TunnelOp::Delete, "tun0"),
            TunnelError::NotFound { name } if name == "tun0"
        ));
        for errno in [Errno::EPERM, Errno::EACCES] {
            match translate(os(errno), TunnelOp::Create, "tun0") {
                TunnelError::Permission { op, message, .. } => {
                    assert_eq!(op, TunnelOp::Create);
                    assert_eq!(message, PERMISSION_MESSAGE);
                }
                other => panic!("Expected Permission, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_translate_keeps_cause() {
        let err = translate(os(Errno::EINVAL), TunnelOp::Create, "tun0");
        assert!(err.is_config_error());
        match &err {
            TunnelError::Operation { message, cause, .. } => {
                assert!(message.contains("invalid configuration"));
                assert_eq!(cause.as_ref().and_then(KernelError::errno), Some(Errno::EINVAL));
            }
            other => panic!("Expected Operation, got {:?}", other),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_translate_op_specific_messages() {
        let busy = translate(os(Errno::EBUSY), TunnelOp::Delete, "tun0");
        assert!(busy.to_string().contains("tunnel may be in use"));

        let in_use = translate(os(Errno::EADDRINUSE), TunnelOp::AssignIp, "tun0");
        assert!(in_use.to_string().contains("another interface"));

        let not_supported = translate(os(Errno::EOPNOTSUPP), TunnelOp::Create, "tun0");
        assert!(not_supported.to_string().contains("modprobe ip_gre"));
    }

    #[test]
    fn test_translate_unrecognized_falls_back() {
        let raw = KernelError::Shell(ShellError::CommandFailed {
            command: "/sbin/ip link add".to_string(),
            exit_code: 255,
            output: "something odd".to_string(),
        });
        let err = translate(raw, TunnelOp::Create, "tun0");
        let text = err.to_string();
        assert!(text.starts_with("create tunnel tun0: operation failed"));
        assert!(text.contains("something odd"));

        let err = translate(os(Errno::EIO), TunnelOp::List, "");
        assert!(err.to_string().starts_with("list tunnels: operation failed"));
    }

    #[test]
    fn test_transient_classification() {
        for errno in [Errno::EBUSY, Errno::ENETDOWN, Errno::EAGAIN, Errno::ETIMEDOUT] {
            let err = TunnelError::operation(TunnelOp::Create, "tun0", "x", Some(os(errno)));
            assert!(err.is_transient(), "{:?} should be transient", errno);
            assert!(!err.is_fatal());
        }
        assert!(!TunnelError::NotFound {
            name: "tun0".into()
        }
        .is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(TunnelError::validation("name", "", "empty").is_fatal());
        assert!(translate(os(Errno::EPERM), TunnelOp::Create, "tun0").is_fatal());
        for errno in [Errno::EINVAL, Errno::EOPNOTSUPP] {
            assert!(translate(os(errno), TunnelOp::Create, "tun0").is_fatal());
        }
        assert!(!TunnelError::Exists {
            name: "tun0".into()
        }
        .is_fatal());
        assert!(!translate(os(Errno::EBUSY), TunnelOp::Create, "tun0").is_fatal());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(
            TunnelError::validation("name", "eth0", "reserved prefix").to_string(),
            "validation failed for name (\"eth0\"): reserved prefix"
        );
        assert_eq!(
            TunnelError::validation("cidr", "", "CIDR cannot be empty").to_string(),
            "validation failed for cidr: CIDR cannot be empty"
        );
        assert_eq!(
            TunnelError::InvalidType {
                name: "eth0".into(),
                actual_type: "veth".into()
            }
            .to_string(),
            "eth0 is not a GRE tunnel (type: veth)"
        );
        assert_eq!(
            translate(os(Errno::EPERM), TunnelOp::Delete, "tun0").to_string(),
            format!("permission denied: delete tunnel tun0: {}", PERMISSION_MESSAGE)
        );
    }

    #[test]
    fn test_hints() {
        let exists = TunnelError::Exists {
            name: "tun0".into(),
        };
        assert!(exists.hint().unwrap().contains("gretun list"));
        assert_eq!(
            exists.format_with_hint(),
            format!("tunnel tun0 already exists\n\nHint: {}", exists.hint().unwrap())
        );

        let perm = translate(os(Errno::EACCES), TunnelOp::Create, "tun0");
        assert!(perm.hint().unwrap().contains("setcap"));

        let module = translate(os(Errno::EOPNOTSUPP), TunnelOp::Create, "tun0");
        assert_eq!(module.hint(), Some("Load the GRE kernel module: sudo modprobe ip_gre"));

        let invalid_type = TunnelError::InvalidType {
            name: "eth0".into(),
            actual_type: "veth".into(),
        };
        assert!(invalid_type.hint().is_none());
        assert_eq!(invalid_type.format_with_hint(), invalid_type.to_string());

        let generic = translate(os(Errno::EIO), TunnelOp::Create, "tun0");
        assert!(generic.hint().is_none());
    }
}
