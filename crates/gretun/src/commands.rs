//! iproute2 command builders for GRE tunnel operations

use gretun_common::shell::{shellquote, IP_CMD};
use ipnet::Ipv4Net;

use crate::kernel::GreLinkSpec;

/// Build GRE interface creation command
///
/// Keys are only passed when non-zero; a zero key means "no key".
pub fn build_add_gre_link_cmd(spec: &GreLinkSpec) -> String {
    let mut cmd = format!(
        "{} link add {} type gre local {} remote {}",
        IP_CMD,
        shellquote(&spec.name),
        shellquote(&spec.local.to_string()),
        shellquote(&spec.remote.to_string())
    );
    if spec.ikey != 0 {
        cmd.push_str(&format!(" ikey {}", spec.ikey));
    }
    if spec.okey != 0 {
        cmd.push_str(&format!(" okey {}", spec.okey));
    }
    cmd.push_str(&format!(" ttl {}", spec.ttl));
    cmd
}

/// Build interface deletion command
pub fn build_del_link_cmd(name: &str) -> String {
    format!("{} link delete dev {}", IP_CMD, shellquote(name))
}

/// Build interface bring-up command
pub fn build_set_link_up_cmd(name: &str) -> String {
    format!("{} link set dev {} up", IP_CMD, shellquote(name))
}

/// Build detailed JSON link query, for one interface or all of them
pub fn build_show_link_cmd(name: Option<&str>) -> String {
    match name {
        Some(name) => format!(
            "{} -details -json link show dev {}",
            IP_CMD,
            shellquote(name)
        ),
        None => format!("{} -details -json link show", IP_CMD),
    }
}

/// Build address assignment command
pub fn build_add_address_cmd(name: &str, addr: &Ipv4Net) -> String {
    format!(
        "{} addr add {} dev {}",
        IP_CMD,
        shellquote(&addr.to_string()),
        shellquote(name)
    )
}

/// Build JSON address query for one interface
pub fn build_show_address_cmd(name: &str) -> String {
    format!("{} -json addr show dev {}", IP_CMD, shellquote(name))
}
