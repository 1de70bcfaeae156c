//! Integration tests for the tunnel lifecycle and probe runs
//!
//! These tests drive the public API against the in-memory kernel, so they
//! need neither root nor a GRE-capable kernel.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use gretun::health::{probe_multiple, HealthReport, ProbeContext, ProbeResult, Prober};
use gretun::kernel::KernelCall;
use gretun::{MemoryKernel, TunnelConfig, TunnelError, TunnelMgr};
use nix::errno::Errno;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn tun0() -> TunnelConfig {
    TunnelConfig::new(
        "tun0",
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
    )
}

#[tokio::test]
async fn test_create_get_delete() {
    let mgr = TunnelMgr::new(MemoryKernel::new());

    mgr.create(&tun0()).await.unwrap();

    let status = mgr.get("tun0").await.unwrap();
    assert_eq!(status.ttl, 64);
    assert!(status.is_up);
    assert_eq!(status.local_address, Some("10.0.0.1".parse().unwrap()));
    assert_eq!(status.remote_address, Some("10.0.0.2".parse().unwrap()));

    mgr.delete("tun0").await.unwrap();

    let err = mgr.get("tun0").await.unwrap_err();
    assert!(matches!(err, TunnelError::NotFound { ref name } if name == "tun0"));
    assert!(err.format_with_hint().contains("gretun list"));
}

#[tokio::test]
async fn test_create_with_address_then_list() {
    let kernel = MemoryKernel::new().with_link("veth0", "veth", true);
    let mgr = TunnelMgr::new(kernel);

    mgr.create_with_address(&tun0().with_key(100), Some("192.168.1.1/30"))
        .await
        .unwrap();

    let tunnels = mgr.list().await.unwrap();
    assert_eq!(tunnels.len(), 1);
    assert_eq!(tunnels[0].key, 100);
    assert_eq!(tunnels[0].tunnel_address.as_deref(), Some("192.168.1.1/30"));

    let json = serde_json::to_value(&tunnels).unwrap();
    assert_eq!(json[0]["tunnelAddress"], "192.168.1.1/30");
    assert_eq!(json[0]["isUp"], true);
}

#[tokio::test]
async fn test_second_create_is_rejected() {
    let mgr = TunnelMgr::new(MemoryKernel::new());
    mgr.create(&tun0()).await.unwrap();

    let other = TunnelConfig::new(
        "tun0",
        IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)),
        IpAddr::V4(Ipv4Addr::new(172, 16, 0, 2)),
    );
    let err = mgr.create(&other).await.unwrap_err();
    assert!(matches!(err, TunnelError::Exists { .. }));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_permission_failure_is_fatal_with_hint() {
    let mgr = TunnelMgr::new(MemoryKernel::new());
    mgr.kernel().fail_with(KernelCall::AddLink, Errno::EPERM);

    let err = mgr.create(&tun0()).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(err.format_with_hint().contains("setcap cap_net_admin+ep"));
    assert!(mgr.kernel().link("tun0").is_none());
}

/// Succeeds on every probe, counting calls
struct CountingProber {
    calls: parking_lot::Mutex<u32>,
}

#[async_trait]
impl Prober for CountingProber {
    async fn probe(&self, target: &str, _timeout: Duration, _ctx: &ProbeContext) -> ProbeResult {
        *self.calls.lock() += 1;
        ProbeResult::success(target, Duration::from_millis(2))
    }
}

#[tokio::test(start_paused = true)]
async fn test_probe_run_builds_report() {
    let prober = CountingProber {
        calls: parking_lot::Mutex::new(0),
    };
    let ctx = ProbeContext::new(CancellationToken::new());

    let (healthy, results) =
        probe_multiple(&prober, "192.168.1.2", 4, Duration::from_secs(1), 3, &ctx).await;
    let report = HealthReport {
        target: "192.168.1.2".to_string(),
        healthy,
        threshold: 3,
        count: 4,
        results,
    };

    assert!(report.healthy);
    assert_eq!(report.successes(), 4);
    assert_eq!(*prober.calls.lock(), 4);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["results"][0]["roundTripTime"], 2.0);
}
