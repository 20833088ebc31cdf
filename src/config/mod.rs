//! Configuration module for pingmon.
//!
//! Process settings come from environment variables with sensible defaults;
//! the monitored devices and notification channels come from a JSON monitor
//! file (see [`MonitorSettings::load`]).

mod device;
mod file;
mod mail;

pub use device::*;
pub use file::*;
pub use mail::*;

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse monitor file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("device name must not be empty")]
    EmptyName,
    #[error("probe interval {0:?} is below the 100ms floor")]
    IntervalTooShort(Duration),
    #[error("response time limit must be greater than zero")]
    ZeroLimit,
    #[error("timeout {timeout:?} must not be below the limit {limit:?}")]
    TimeoutBelowLimit { timeout: Duration, limit: Duration },
    #[error("display scale {max_scale:?} must not be below the limit {limit:?}")]
    ScaleBelowLimit { max_scale: Duration, limit: Duration },
    #[error("invalid e-mail address {address:?}: {source}")]
    Email {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("could not resolve {address}: {reason}")]
    Resolve { address: String, reason: String },
    #[error("device #{index} ({name}): {source}")]
    Device {
        index: usize,
        name: String,
        source: Box<ConfigError>,
    },
    #[error("mail settings: {0}")]
    Mail(String),
    #[error("invalid webhook url {url:?}: {reason}")]
    Webhook { url: String, reason: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the JSON monitor file (default: "pingmon.json")
    pub config_path: PathBuf,
    /// HTTP port for the status server, 0 disables it (default: 8080)
    pub http_port: u16,
    /// Scheduler wake-up period (default: 10ms)
    pub tick: Duration,
    /// Pause between two dispatches within one tick (default: 10ms)
    pub dispatch_gap: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("pingmon.json"),
            http_port: 8080,
            tick: Duration::from_millis(10),
            dispatch_gap: Duration::from_millis(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGMON_CONFIG`: monitor file path (default: "pingmon.json")
    /// - `PINGMON_HTTP_PORT`: status server port, 0 disables (default: 8080)
    /// - `PINGMON_TICK_MS`: scheduler tick in milliseconds (default: 10)
    /// - `PINGMON_DISPATCH_GAP_MS`: gap between dispatches (default: 10)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(path) = lookup("PINGMON_CONFIG") {
            cfg.config_path = PathBuf::from(path);
        }

        if let Some(port) = lookup("PINGMON_HTTP_PORT").and_then(|p| p.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(ms) = lookup("PINGMON_TICK_MS").and_then(|v| v.parse::<u64>().ok()) {
            if ms > 0 {
                cfg.tick = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = lookup("PINGMON_DISPATCH_GAP_MS").and_then(|v| v.parse().ok()) {
            cfg.dispatch_gap = Duration::from_millis(ms);
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.config_path, PathBuf::from("pingmon.json"));
        assert_eq!(cfg.tick, Duration::from_millis(10));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PINGMON_CONFIG", "/etc/pingmon/devices.json"),
            ("PINGMON_HTTP_PORT", "0"),
            ("PINGMON_TICK_MS", "25"),
            ("PINGMON_DISPATCH_GAP_MS", "0"),
        ]
        .into_iter()
        .collect();

        let cfg = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.config_path, PathBuf::from("/etc/pingmon/devices.json"));
        assert_eq!(cfg.http_port, 0);
        assert_eq!(cfg.tick, Duration::from_millis(25));
        assert_eq!(cfg.dispatch_gap, Duration::ZERO);
    }

    #[test]
    fn test_garbage_env_keeps_defaults() {
        let cfg = ServerConfig::from_lookup(|k| match k {
            "PINGMON_HTTP_PORT" => Some("not-a-port".into()),
            "PINGMON_TICK_MS" => Some("0".into()),
            _ => None,
        });
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.tick, Duration::from_millis(10));
    }
}
