//! Human-readable and JSON output for the command line

use std::net::IpAddr;
use std::time::Duration;

use anyhow::Result;
use gretun::health::HealthReport;
use gretun::TunnelStatus;
use serde::Serialize;

pub(crate) fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn endpoint(addr: Option<IpAddr>) -> String {
    addr.map_or_else(|| "any".to_string(), |a| a.to_string())
}

fn up_down(is_up: bool) -> &'static str {
    if is_up {
        "up"
    } else {
        "down"
    }
}

/// Column-aligned tunnel table, two spaces between columns
pub(crate) fn tunnel_table(tunnels: &[TunnelStatus]) -> String {
    let header = ["NAME", "LOCAL", "REMOTE", "KEY", "TUNNEL IP", "STATUS"].map(String::from);
    let rows: Vec<[String; 6]> = tunnels
        .iter()
        .map(|t| {
            [
                t.name.clone(),
                endpoint(t.local_address),
                endpoint(t.remote_address),
                if t.key == 0 {
                    "-".to_string()
                } else {
                    t.key.to_string()
                },
                t.tunnel_address.clone().unwrap_or_else(|| "-".to_string()),
                up_down(t.is_up).to_string(),
            ]
        })
        .collect();

    let mut widths = header.clone().map(|h| h.len());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&header).chain(&rows) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

/// Detail block for a single tunnel
pub(crate) fn tunnel_detail(status: &TunnelStatus) -> String {
    let mut out = format!("Tunnel: {}\n", status.name);
    out.push_str(&format!("  Status:    {}\n", up_down(status.is_up)));
    out.push_str(&format!("  Local:     {}\n", endpoint(status.local_address)));
    out.push_str(&format!("  Remote:    {}\n", endpoint(status.remote_address)));
    if status.key != 0 {
        out.push_str(&format!("  Key:       {}\n", status.key));
    }
    out.push_str(&format!("  TTL:       {}\n", status.ttl));
    if let Some(addr) = &status.tunnel_address {
        out.push_str(&format!("  Tunnel IP: {}\n", addr));
    }
    out
}

/// Per-probe lines, summary and verdict
pub(crate) fn probe_report(report: &HealthReport) -> String {
    let mut out = String::new();
    for (i, result) in report.results.iter().enumerate() {
        match (result.round_trip_time, &result.error) {
            (Some(rtt), _) if result.success => {
                let rtt = Duration::from_micros(u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX));
                out.push_str(&format!("probe {}: {} rtt={:?}\n", i + 1, report.target, rtt));
            }
            (_, error) => {
                out.push_str(&format!(
                    "probe {}: {} error={}\n",
                    i + 1,
                    report.target,
                    error.as_deref().unwrap_or("unknown")
                ));
            }
        }
    }

    out.push_str(&format!(
        "\n{}/{} probes successful\n",
        report.successes(),
        report.count
    ));
    out.push_str(&format!(
        "status: {}\n",
        if report.healthy { "healthy" } else { "unhealthy" }
    ));
    out
}
