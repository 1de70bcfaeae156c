//! Tunnel health probing
//!
//! A [`Prober`] sends one reachability probe and reports the outcome as a
//! [`ProbeResult`]; [`probe_multiple`] runs a series of probes and judges
//! the target healthy when enough of them succeed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod icmp;

pub use icmp::{
    checksum, encode_echo_request, parse_reply, IcmpProber, IcmpReply, ICMP_ECHO_REPLY,
    ICMP_ECHO_REQUEST, PROBE_PAYLOAD,
};

/// Delay between consecutive probes of one run
pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on the result buffer reserved up front
const MAX_RESERVED_RESULTS: u32 = 64;

/// Defaults applied by the command line
pub mod defaults {
    use std::time::Duration;

    pub const COUNT: u32 = 3;
    pub const TIMEOUT: Duration = Duration::from_secs(2);
    pub const THRESHOLD: u32 = 2;
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub target: String,
    pub success: bool,
    /// Send-to-receipt time, successful probes only
    #[serde(
        serialize_with = "serialize_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub round_trip_time: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn serialize_millis<S: Serializer>(rtt: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match rtt {
        Some(rtt) => s.serialize_f64(rtt.as_nanos() as f64 / 1e6),
        None => s.serialize_none(),
    }
}

impl ProbeResult {
    /// Successful probe with the measured round trip
    pub fn success(target: impl Into<String>, rtt: Duration) -> Self {
        Self {
            target: target.into(),
            success: true,
            round_trip_time: Some(rtt),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed probe with a reason
    pub fn failure(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            success: false,
            round_trip_time: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Serializable outcome of a multi-probe run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub target: String,
    pub healthy: bool,
    pub threshold: u32,
    pub count: u32,
    pub results: Vec<ProbeResult>,
}

impl HealthReport {
    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

/// Cancellation and deadline shared by every probe of a run.
#[derive(Debug, Clone, Default)]
pub struct ProbeContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl ProbeContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Stop the run at `deadline` (builder pattern)
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// True once cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Why the context is done, for probe error messages
    pub fn reason(&self) -> &'static str {
        if self.cancel.is_cancelled() {
            "cancelled"
        } else {
            "cancelled: deadline exceeded"
        }
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// `timeout` shortened to the deadline, if that comes first
    pub fn effective_timeout(&self, timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }
}

/// A single reachability probe.
///
/// Implementations never fail: every failure is reported in the returned
/// [`ProbeResult`].
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &str, timeout: Duration, ctx: &ProbeContext) -> ProbeResult;
}

/// Run `count` probes against `target`, [`PROBE_INTERVAL`] apart.
///
/// Healthy when at least `threshold` probes succeed. A run interrupted by
/// the context returns the results gathered so far and is never healthy.
pub async fn probe_multiple<P: Prober + ?Sized>(
    prober: &P,
    target: &str,
    count: u32,
    timeout: Duration,
    threshold: u32,
    ctx: &ProbeContext,
) -> (bool, Vec<ProbeResult>) {
    let mut results = Vec::with_capacity(count.min(MAX_RESERVED_RESULTS) as usize);

    for i in 0..count {
        if ctx.is_done() {
            info!(host = target, completed = results.len(), "Probe run cancelled");
            return (false, results);
        }

        let result = prober.probe(target, timeout, ctx).await;
        debug!(
            host = target,
            seq = i + 1,
            success = result.success,
            error = result.error.as_deref().unwrap_or(""),
            "Probe finished"
        );
        results.push(result);

        if i + 1 < count {
            tokio::select! {
                _ = ctx.done() => {
                    info!(host = target, completed = results.len(), "Probe run cancelled");
                    return (false, results);
                }
                _ = sleep(PROBE_INTERVAL) => {}
            }
        }
    }

    let successes = results.iter().filter(|r| r.success).count();
    (successes >= threshold as usize, results)
}
