//! Kernel port backed by iproute2.
//!
//! Each capability is one `ip` invocation. Link state is read from
//! `ip -details -json`, and failures are mapped back to an errno from the
//! diagnostics iproute2 prints (`RTNETLINK answers: File exists`, ...).

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use gretun_common::shell;
use ipnet::{IpNet, Ipv4Net};
use nix::errno::Errno;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{GreAttrs, GreLinkSpec, KernelError, KernelInterface, KernelResult, Link};
use crate::commands::*;
use crate::types::GRE_KIND;

/// Kind reported for links that carry no `linkinfo` (physical NICs, loopback)
const PLAIN_DEVICE_KIND: &str = "device";

/// iproute2 diagnostics and the errno they stand for. The first match wins.
const DIAGNOSTIC_ERRNOS: &[(&str, Errno)] = &[
    ("File exists", Errno::EEXIST),
    ("No such device", Errno::ENODEV),
    ("Cannot find device", Errno::ENODEV),
    ("does not exist", Errno::ENODEV),
    ("Operation not permitted", Errno::EPERM),
    ("Permission denied", Errno::EACCES),
    ("Invalid argument", Errno::EINVAL),
    ("Operation not supported", Errno::EOPNOTSUPP),
    ("Unknown device type", Errno::EOPNOTSUPP),
    ("Device or resource busy", Errno::EBUSY),
    ("Network is down", Errno::ENETDOWN),
    ("Address already in use", Errno::EADDRINUSE),
    ("Resource temporarily unavailable", Errno::EAGAIN),
    ("Connection timed out", Errno::ETIMEDOUT),
];

/// Recovers the errno behind an `ip` failure from its output.
pub fn errno_from_output(output: &str) -> Option<Errno> {
    DIAGNOSTIC_ERRNOS
        .iter()
        .find(|(needle, _)| output.contains(needle))
        .map(|(_, errno)| *errno)
}

/// Kernel port that shells out to `ip`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IprouteKernel;

impl IprouteKernel {
    pub fn new() -> Self {
        Self
    }

    /// Run one `ip` command, returning stdout or the raw failure
    async fn run(&self, cmd: &str) -> KernelResult<String> {
        shell::exec_or_throw(cmd).await.map_err(|e| {
            debug!(command = e.command(), "ip command failed");
            match e.output().and_then(errno_from_output) {
                Some(errno) => KernelError::os(errno, e.output().unwrap_or_default()),
                None => KernelError::Shell(e),
            }
        })
    }
}

#[async_trait]
impl KernelInterface for IprouteKernel {
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn add_link(&self, spec: &GreLinkSpec) -> KernelResult<()> {
        self.run(&build_add_gre_link_cmd(spec)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_link(&self, name: &str) -> KernelResult<()> {
        self.run(&build_del_link_cmd(name)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_link_by_name(&self, name: &str) -> KernelResult<Option<Link>> {
        let stdout = match self.run(&build_show_link_cmd(Some(name))).await {
            Ok(stdout) => stdout,
            Err(e) if e.errno() == Some(Errno::ENODEV) => {
                debug!("No such link");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(parse_links(&stdout)?.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn bring_link_up(&self, name: &str) -> KernelResult<()> {
        self.run(&build_set_link_up_cmd(name)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_links(&self) -> KernelResult<Vec<Link>> {
        let stdout = self.run(&build_show_link_cmd(None)).await?;
        let links = parse_links(&stdout)?;
        debug!(count = links.len(), "Listed links");
        Ok(links)
    }

    #[instrument(skip(self, addr), fields(addr = %addr))]
    async fn add_address(&self, name: &str, addr: Ipv4Net) -> KernelResult<()> {
        self.run(&build_add_address_cmd(name, &addr)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_addresses(&self, name: &str) -> KernelResult<Vec<IpNet>> {
        let stdout = self.run(&build_show_address_cmd(name)).await?;
        parse_addresses(&stdout)
    }
}

#[derive(Debug, Deserialize)]
struct RawLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    linkinfo: Option<RawLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct RawLinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawAddrIface {
    #[serde(default)]
    addr_info: Vec<RawAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct RawAddrInfo {
    #[serde(default)]
    local: Option<IpAddr>,
    #[serde(default)]
    prefixlen: Option<u8>,
}

/// Decode `ip -details -json link show` output.
pub fn parse_links(json: &str) -> KernelResult<Vec<Link>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<RawLink> = serde_json::from_str(json).map_err(|e| KernelError::Malformed {
        detail: format!("link list: {}", e),
    })?;

    Ok(raw.into_iter().map(link_from_raw).collect())
}

fn link_from_raw(raw: RawLink) -> Link {
    let is_up = raw.flags.iter().any(|f| f == "UP");
    let (kind, info_data) = match raw.linkinfo {
        Some(info) => (
            info.info_kind
                .unwrap_or_else(|| PLAIN_DEVICE_KIND.to_string()),
            info.info_data,
        ),
        None => (PLAIN_DEVICE_KIND.to_string(), None),
    };

    let gre = if kind == GRE_KIND {
        info_data.as_ref().and_then(gre_attrs_from_info)
    } else {
        None
    };

    Link {
        name: raw.ifname,
        kind,
        is_up,
        gre,
    }
}

/// Extract GRE attributes; `None` if `info_data` is not an object.
fn gre_attrs_from_info(data: &Value) -> Option<GreAttrs> {
    let data = data.as_object()?;
    Some(GreAttrs {
        local: data.get("local").and_then(endpoint),
        remote: data.get("remote").and_then(endpoint),
        ikey: data.get("ikey").and_then(gre_key).unwrap_or(0),
        okey: data.get("okey").and_then(gre_key).unwrap_or(0),
        ttl: data
            .get("ttl")
            .and_then(Value::as_u64)
            .and_then(|t| u8::try_from(t).ok())
            .unwrap_or(0),
    })
}

/// Endpoint address; `any` and anything unparsable decode to `None`
fn endpoint(value: &Value) -> Option<Ipv4Addr> {
    value.as_str()?.parse().ok()
}

/// GRE keys are printed as dotted quads by iproute2, as integers by some builds
fn gre_key(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|k| u32::try_from(k).ok()),
        Value::String(s) => s
            .parse::<Ipv4Addr>()
            .map(u32::from)
            .or_else(|_| s.parse::<u32>())
            .ok(),
        _ => None,
    }
}

/// Decode `ip -json addr show dev <name>` output.
pub fn parse_addresses(json: &str) -> KernelResult<Vec<IpNet>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<RawAddrIface> =
        serde_json::from_str(json).map_err(|e| KernelError::Malformed {
            detail: format!("address list: {}", e),
        })?;

    Ok(raw
        .into_iter()
        .flat_map(|iface| iface.addr_info)
        .filter_map(|info| IpNet::new(info.local?, info.prefixlen?).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gretun_common::ShellError;
    use pretty_assertions::assert_eq;

    const LINKS_JSON: &str = r#"[
        {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"mtu":65536,"link_type":"loopback"},
        {"ifindex":2,"ifname":"eth0","flags":["BROADCAST","MULTICAST","UP"],"mtu":1500,"link_type":"ether",
         "linkinfo":{"info_kind":"veth"}},
        {"ifindex":5,"ifname":"tun0","flags":["POINTOPOINT","NOARP","UP","LOWER_UP"],"mtu":1476,"link_type":"gre",
         "linkinfo":{"info_kind":"gre","info_data":{"remote":"10.0.0.2","local":"10.0.0.1","ttl":64,
         "pmtudisc":true,"ikey":"0.0.0.42","okey":"0.0.0.42"}}},
        {"ifindex":6,"ifname":"tun1","flags":["POINTOPOINT","NOARP"],"mtu":1476,"link_type":"gre",
         "linkinfo":{"info_kind":"gre","info_data":{"remote":"10.0.1.2","local":"any","pmtudisc":true}}},
        {"ifindex":7,"ifname":"gre0","flags":["NOARP"],"mtu":1476,"link_type":"gre",
         "linkinfo":{"info_kind":"gre"}}
    ]"#;

    #[test]
    fn test_parse_links() {
        let links = parse_links(LINKS_JSON).unwrap();
        assert_eq!(links.len(), 5);

        assert_eq!(links[0].name, "lo");
        assert_eq!(links[0].kind, "device");
        assert!(links[0].is_up);
        assert!(links[0].gre.is_none());

        assert_eq!(links[1].kind, "veth");
        assert!(!links[1].is_gre());

        let tun0 = &links[2];
        assert!(tun0.is_gre());
        assert!(tun0.is_up);
        assert_eq!(
            tun0.gre,
            Some(GreAttrs {
                local: Some(Ipv4Addr::new(10, 0, 0, 1)),
                remote: Some(Ipv4Addr::new(10, 0, 0, 2)),
                ikey: 42,
                okey: 42,
                ttl: 64,
            })
        );
    }

    #[test]
    fn test_parse_links_inherit_ttl_and_any_endpoint() {
        let links = parse_links(LINKS_JSON).unwrap();
        let tun1 = links[3].gre.unwrap();
        assert!(!links[3].is_up);
        assert_eq!(tun1.local, None);
        assert_eq!(tun1.remote, Some(Ipv4Addr::new(10, 0, 1, 2)));
        assert_eq!(tun1.ttl, 0);
        assert_eq!(tun1.ikey, 0);
    }

    #[test]
    fn test_parse_links_gre_without_info_data() {
        let links = parse_links(LINKS_JSON).unwrap();
        assert!(links[4].is_gre());
        assert!(links[4].gre.is_none());
    }

    #[test]
    fn test_parse_links_numeric_key() {
        let json = r#"[{"ifname":"tun2","flags":[],"linkinfo":{"info_kind":"gre",
            "info_data":{"local":"10.0.0.1","remote":"10.0.0.2","ikey":7,"okey":"9","ttl":255}}}]"#;
        let gre = parse_links(json).unwrap()[0].gre.unwrap();
        assert_eq!(gre.ikey, 7);
        assert_eq!(gre.okey, 9);
        assert_eq!(gre.ttl, 255);
    }

    #[test]
    fn test_parse_links_malformed() {
        let err = parse_links("not json").unwrap_err();
        assert!(matches!(err, KernelError::Malformed { .. }));
        assert!(err.errno().is_none());
        assert!(parse_links("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_addresses() {
        let json = r#"[{"ifindex":5,"ifname":"tun0","addr_info":[
            {"family":"inet","local":"192.168.1.1","prefixlen":30,"scope":"global"},
            {},
            {"family":"inet6","local":"fe80::5efe:a00:1","prefixlen":64,"scope":"link"}]}]"#;
        let addrs = parse_addresses(json).unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].to_string(), "192.168.1.1/30");
        assert_eq!(addrs[1].to_string(), "fe80::5efe:a00:1/64");

        assert!(parse_addresses("[]").unwrap().is_empty());
        assert!(parse_addresses("[{\"ifname\":\"tun0\"}]").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_recovers_errno_from_diagnostics() {
        let kernel = IprouteKernel::new();

        let err = kernel
            .run("echo 'RTNETLINK answers: File exists' >&2; exit 2")
            .await
            .unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EEXIST));
        assert!(err.to_string().contains("File exists"));

        let err = kernel.run("echo 'odd failure' >&2; exit 3").await.unwrap_err();
        assert!(err.errno().is_none());
        match err {
            KernelError::Shell(ShellError::CommandFailed {
                exit_code, output, ..
            }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(output, "odd failure");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }

        assert_eq!(kernel.run("echo ok").await.unwrap(), "ok");
    }

    #[test]
    fn test_errno_from_output() {
        let cases = [
            ("RTNETLINK answers: File exists", Some(Errno::EEXIST)),
            ("Cannot find device \"tun9\"", Some(Errno::ENODEV)),
            ("Device \"tun9\" does not exist.", Some(Errno::ENODEV)),
            ("RTNETLINK answers: Operation not permitted", Some(Errno::EPERM)),
            ("RTNETLINK answers: Invalid argument", Some(Errno::EINVAL)),
            ("Error: Unknown device type.", Some(Errno::EOPNOTSUPP)),
            ("RTNETLINK answers: Device or resource busy", Some(Errno::EBUSY)),
            ("RTNETLINK answers: Address already in use", Some(Errno::EADDRINUSE)),
            ("Error: either \"local\" is duplicate, or \"x\" is a garbage.", None),
        ];
        for (output, want) in cases {
            assert_eq!(errno_from_output(output), want, "{}", output);
        }
    }
}
