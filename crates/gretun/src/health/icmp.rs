//! ICMPv4 echo prober over a raw socket

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::fd::{FromRawFd, OwnedFd};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use super::{ProbeContext, ProbeResult, Prober};

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// Payload carried by every echo request
pub const PROBE_PAYLOAD: &[u8] = b"gretun-probe";

/// Masks the PID to a 16-bit echo identifier
const ICMP_ID_MASK: u32 = 0xffff;

const PROBE_SEQUENCE: u16 = 1;

const ICMP_HEADER_LEN: usize = 8;

/// Ethernet MTU
const REPLY_BUFFER: usize = 1500;

/// Internet checksum (RFC 1071)
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Encode an echo request with its checksum filled in
pub fn encode_echo_request(id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + payload.len());
    packet.extend_from_slice(&[ICMP_ECHO_REQUEST, 0, 0, 0]);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(payload);

    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Decoded ICMP message, as far as the prober cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpReply {
    EchoReply { id: u16, seq: u16 },
    EchoRequest { id: u16, seq: u16 },
    Other { icmp_type: u8, code: u8 },
}

/// Decode an ICMP message, with or without a leading IPv4 header.
pub fn parse_reply(buf: &[u8]) -> Result<IcmpReply, String> {
    let mut msg = buf;
    if let Some(first) = buf.first() {
        if first >> 4 == 4 {
            let header_len = usize::from(first & 0x0f) * 4;
            if header_len < 20 || buf.len() < header_len {
                return Err(format!("truncated IPv4 header ({} bytes)", buf.len()));
            }
            msg = &buf[header_len..];
        }
    }

    if msg.len() < ICMP_HEADER_LEN {
        return Err(format!("message too short ({} bytes)", msg.len()));
    }

    let id = u16::from_be_bytes([msg[4], msg[5]]);
    let seq = u16::from_be_bytes([msg[6], msg[7]]);
    Ok(match (msg[0], msg[1]) {
        (ICMP_ECHO_REPLY, _) => IcmpReply::EchoReply { id, seq },
        (ICMP_ECHO_REQUEST, _) => IcmpReply::EchoRequest { id, seq },
        (icmp_type, code) => IcmpReply::Other { icmp_type, code },
    })
}

/// Open a non-blocking raw ICMPv4 socket.
///
/// The descriptor is driven through tokio's UDP socket type, which only
/// needs an AF_INET datagram-style fd for `send_to` / `recv_from`.
fn open_socket() -> io::Result<UdpSocket> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            libc::IPPROTO_ICMP,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    UdpSocket::from_std(std::net::UdpSocket::from(owned))
}

async fn resolve(target: &str) -> io::Result<Ipv4Addr> {
    if let Ok(IpAddr::V4(addr)) = target.parse::<IpAddr>() {
        return Ok(addr);
    }

    tokio::net::lookup_host((target, 0))
        .await?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IPv4 address"))
}

/// Single ICMP echo probe.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    id: u16,
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self {
            id: (std::process::id() & ICMP_ID_MASK) as u16,
        }
    }
}

impl IcmpProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo identifier stamped on requests
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Send one echo request and wait for its reply.
    ///
    /// The raw socket sees every ICMP message on the host. Echo replies
    /// with another identifier and echo requests (including our own,
    /// looped back) are skipped until the timeout; any other ICMP type
    /// fails the probe.
    async fn exchange(
        &self,
        target: &str,
        timeout: Duration,
        ctx: &ProbeContext,
    ) -> Result<Duration, String> {
        let socket = open_socket().map_err(|e| format!("failed to listen: {}", e))?;
        let dst = resolve(target)
            .await
            .map_err(|e| format!("failed to resolve {}: {}", target, e))?;

        let request = encode_echo_request(self.id, PROBE_SEQUENCE, PROBE_PAYLOAD);
        let start = Instant::now();
        socket
            .send_to(&request, SocketAddr::new(IpAddr::V4(dst), 0))
            .await
            .map_err(|e| format!("failed to send ICMP: {}", e))?;

        let deadline = start + ctx.effective_timeout(timeout);
        let mut buf = [0u8; REPLY_BUFFER];
        loop {
            let (len, from) = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ctx.reason().to_string()),
                _ = sleep_until(deadline) => {
                    if ctx.is_done() {
                        return Err(ctx.reason().to_string());
                    }
                    return Err("failed to receive reply: timed out".to_string());
                }
                received = socket.recv_from(&mut buf) => {
                    received.map_err(|e| format!("failed to receive reply: {}", e))?
                }
            };

            let reply =
                parse_reply(&buf[..len]).map_err(|e| format!("failed to parse reply: {}", e))?;
            match reply {
                IcmpReply::EchoReply { id, seq } if id == self.id && seq == PROBE_SEQUENCE => {
                    return Ok(start.elapsed());
                }
                IcmpReply::EchoReply { .. } | IcmpReply::EchoRequest { .. } => {
                    debug!(%from, ?reply, "Skipping echo traffic that is not ours");
                }
                IcmpReply::Other { icmp_type, code } => {
                    return Err(format!("unexpected ICMP type: {} (code {})", icmp_type, code));
                }
            }
        }
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, target: &str, timeout: Duration, ctx: &ProbeContext) -> ProbeResult {
        if ctx.is_done() {
            return ProbeResult::failure(target, ctx.reason());
        }

        match self.exchange(target, timeout, ctx).await {
            Ok(rtt) => ProbeResult::success(target, rtt),
            Err(error) => ProbeResult::failure(target, error),
        }
    }
}
