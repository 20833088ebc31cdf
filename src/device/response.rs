//! Classification of probe outcomes.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::probe::ProbeOutcome;

/// How a probe went, relative to the device's response time limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseClass {
    Normal,
    LimitExceeded,
    Timeout,
    NotReachable,
}

impl ResponseClass {
    /// Classify an outcome against `limit`.
    pub fn classify(outcome: &ProbeOutcome, limit: Duration) -> Self {
        match outcome {
            ProbeOutcome {
                success: true,
                timed_out: false,
                rtt,
            } if *rtt <= limit => Self::Normal,
            ProbeOutcome {
                success: true,
                timed_out: false,
                ..
            } => Self::LimitExceeded,
            ProbeOutcome {
                timed_out: true, ..
            } => Self::Timeout,
            _ => Self::NotReachable,
        }
    }

    /// True for every class that counts against the device.
    pub fn is_degraded(self) -> bool {
        self != Self::Normal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::Timeout => "TIMEOUT",
            Self::NotReachable => "NOT_REACHABLE",
        }
    }
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
