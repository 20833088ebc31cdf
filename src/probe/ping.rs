//! ICMP echo prober with native sockets (high-precision) and command fallback.
//!
//! Native echoes run on the blocking pool for sub-millisecond timing.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{ProbeError, ProbeOutcome, Prober};

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

const ECHO_PACKET_LEN: usize = 64;

/// Protocol constants for one address family.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    unreachable_type: u8,
    /// ICMPv6 checksums are filled in by the kernel.
    needs_checksum: bool,
}

const ECHO_V4: EchoFamily = EchoFamily {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
    unreachable_type: 3,
    needs_checksum: true,
};

const ECHO_V6: EchoFamily = EchoFamily {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
    unreachable_type: 1,
    needs_checksum: false,
};

/// What a received datagram turned out to be.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Received {
    /// The echo reply we are waiting for
    Reply,
    /// Destination unreachable report for our request
    Unreachable,
    /// Somebody else's traffic
    Unrelated,
}

/// Production [`Prober`] sending real ICMP echo requests.
#[derive(Debug, Default, Clone)]
pub struct IcmpProber;

impl IcmpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn send(&self, address: IpAddr, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

        if capability == IcmpCapability::CommandOnly {
            return run_ping_command(address, timeout).await;
        }

        let result = tokio::task::spawn_blocking(move || run_blocking_echo(address, timeout))
            .await
            .map_err(|e| ProbeError::Task(format!("spawn_blocking failed: {}", e)))?;

        match result {
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                tracing::warn!(
                    %address,
                    "Native ping failed with permission error, falling back to command: {}",
                    msg
                );
                run_ping_command(address, timeout).await
            }
            other => other,
        }
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

/// Generate a unique identifier for each echo request.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

/// Detect ICMP capability by attempting to create a socket.
fn detect_icmp_capability() -> IcmpCapability {
    // RAW needs CAP_NET_RAW or root
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    // DGRAM works unprivileged on Linux with ping_group_range set, or macOS
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

fn net_err(what: &str) -> impl FnOnce(std::io::Error) -> ProbeError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}: {}", what, e))
        } else {
            ProbeError::Network(format!("{}: {}", what, e))
        }
    }
}

/// Send one echo request and wait for the matching reply.
/// Runs on a dedicated blocking thread.
fn run_blocking_echo(ip: IpAddr, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
    let family = match ip {
        IpAddr::V4(_) => &ECHO_V4,
        IpAddr::V6(_) => &ECHO_V6,
    };

    // RAW first (privileged), then DGRAM (unprivileged)
    let (socket, raw) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(s) => (s, true),
        Err(_) => (
            Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
                .map_err(net_err("failed to create ICMP socket"))?,
            false,
        ),
    };

    socket
        .set_read_timeout(Some(timeout))
        .map_err(net_err("failed to set timeout"))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(net_err("failed to set timeout"))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(net_err("failed to connect"))?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_echo_request(family, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(net_err("failed to send"))?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(ProbeOutcome::timeout(timeout));
            }
            Err(e) => return Err(net_err("failed to receive")(e)),
        };
        let elapsed = start.elapsed();

        // SAFETY: recv initialized the first `len` bytes
        let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if elapsed >= timeout {
            return Ok(ProbeOutcome::timeout(timeout));
        }

        // The kernel rewrites the identifier of DGRAM sockets and filters
        // replies for us, so only RAW sockets compare it.
        let expected_id = raw.then_some(identifier);
        match classify_datagram(family, data, expected_id, sequence) {
            Received::Reply => return Ok(ProbeOutcome::reply(elapsed)),
            Received::Unreachable => return Ok(ProbeOutcome::unreachable()),
            Received::Unrelated => continue,
        }
    }
}

/// Offset of the ICMP header, skipping an IPv4 header when one is present.
fn icmp_offset(data: &[u8]) -> usize {
    match data.first() {
        Some(b) if b >> 4 == 4 => usize::from(b & 0x0F) * 4,
        _ => 0,
    }
}

fn read_id_seq(data: &[u8], at: usize) -> Option<(u16, u16)> {
    let bytes = data.get(at + 4..at + 8)?;
    Some((
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ))
}

/// Decide whether a datagram answers our request.
fn classify_datagram(
    family: &EchoFamily,
    data: &[u8],
    expected_id: Option<u16>,
    sequence: u16,
) -> Received {
    let at = icmp_offset(data);
    let Some(&kind) = data.get(at) else {
        return Received::Unrelated;
    };
    let ours = |(id, seq): (u16, u16)| seq == sequence && expected_id.map_or(true, |e| e == id);

    if kind == family.reply_type {
        return match read_id_seq(data, at) {
            Some(ids) if ours(ids) => Received::Reply,
            _ => Received::Unrelated,
        };
    }

    if kind == family.unreachable_type {
        // The error quotes our original request after its own 8-byte header
        let quoted = &data[(at + 8).min(data.len())..];
        let header = match quoted.first() {
            Some(b) if b >> 4 == 6 => 40,
            _ => icmp_offset(quoted),
        };
        let inner = at + 8 + header;
        return match (data.get(inner), read_id_seq(data, inner)) {
            (Some(&t), Some(ids)) if t == family.request_type && ours(ids) => {
                Received::Unreachable
            }
            _ => Received::Unrelated,
        };
    }

    Received::Unrelated
}

/// Build an echo request packet with a timestamp payload.
fn build_echo_request(family: &EchoFamily, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; ECHO_PACKET_LEN]; // 8 byte header + 56 byte payload

    packet[0] = family.request_type;
    packet[1] = 0; // Code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    if family.needs_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run ping via the system command (fallback).
async fn run_ping_command(address: IpAddr, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);
    let address = address.to_string();

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), &address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("Unreachable") || stderr.contains("Unreachable") {
            return Ok(ProbeOutcome::unreachable());
        }
        if stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Ok(ProbeOutcome::timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout.trim())));
    }

    let rtt = parse_ping_output(&stdout)?;
    if rtt >= timeout {
        return Ok(ProbeOutcome::timeout(timeout));
    }
    Ok(ProbeOutcome::reply(rtt))
}

/// Parse ping command output for the round-trip time.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            // Per-packet "time=X.XXX ms" (Linux, some macOS)
            Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").expect("static regex"),
            // macOS summary "round-trip min/avg/max/stddev = a/b/c/d ms"
            Regex::new(r"round-trip\s+min/avg/max/stddev\s*=\s*[0-9.]+/(?P<val>[0-9.]+)/")
                .expect("static regex"),
            // Linux summary "rtt min/avg/max/mdev = a/b/c/d ms"
            Regex::new(r"rtt\s+min/avg/max/mdev\s*=\s*[0-9.]+/(?P<val>[0-9.]+)/")
                .expect("static regex"),
        ]
    });

    patterns
        .iter()
        .filter_map(|re| re.captures(output))
        .filter_map(|caps| caps.name("val")?.as_str().parse::<f64>().ok())
        .find(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_micros((ms * 1000.0).round() as u64))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}
