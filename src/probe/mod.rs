//! Probe-execution boundary.
//!
//! A [`Prober`] sends one echo request and reports how it went. Devices only
//! depend on the trait, so tests can swap the ICMP implementation for a
//! scripted one.

mod ping;

pub use ping::*;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("probe task failed: {0}")]
    Task(String),
}

/// Result of a probe that the boundary managed to carry out.
///
/// A timed out echo is still an outcome, not an error: the request went out
/// and no reply came back in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub timed_out: bool,
    pub rtt: Duration,
}

impl ProbeOutcome {
    /// An echo reply arrived after `rtt`.
    pub fn reply(rtt: Duration) -> Self {
        Self {
            success: true,
            timed_out: false,
            rtt,
        }
    }

    /// No reply within `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            success: false,
            timed_out: true,
            rtt: timeout,
        }
    }

    /// The request failed without a usable reply, e.g. host unreachable.
    pub fn unreachable() -> Self {
        Self {
            success: false,
            timed_out: false,
            rtt: Duration::ZERO,
        }
    }
}

/// Something that can send an echo request to an address.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Probe `address`, giving up after `timeout`.
    async fn send(&self, address: IpAddr, timeout: Duration) -> Result<ProbeOutcome, ProbeError>;
}
