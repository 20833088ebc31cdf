//! JSON monitor file loading.
//!
//! ```json
//! {
//!   "devices": [
//!     { "name": "Gateway", "address": "192.168.1.1", "interval_ms": 1000,
//!       "limit_ms": 20, "max_scale_ms": 100, "email": "ops@example.com" }
//!   ],
//!   "mail": { "smtp_host": "smtp.example.com", "from": "pingmon@example.com" },
//!   "webhook": { "url": "https://hooks.example.com/pingmon" }
//! }
//! ```

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{ConfigError, DeviceConfig, MailConfig, MailSettings, WebhookConfig, WebhookSettings};

/// Raw monitor file layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorFile {
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub mail: Option<MailSettings>,
    #[serde(default)]
    pub webhook: Option<WebhookSettings>,
}

/// One `devices` entry, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    pub name: String,
    pub address: String,
    pub interval_ms: u64,
    pub limit_ms: u64,
    pub max_scale_ms: u64,
    /// Defaults to `max_scale_ms`
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub email: String,
}

/// Everything the monitor needs, validated and resolved.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub devices: Vec<DeviceConfig>,
    pub mail: Option<MailConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl MonitorSettings {
    /// Read and validate a monitor file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Reading monitor file {}", path.display());

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_json(&raw).await
    }

    /// Parse and validate monitor file contents.
    pub async fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: MonitorFile = serde_json::from_str(raw)?;

        let mut devices = Vec::with_capacity(file.devices.len());
        for (index, entry) in file.devices.into_iter().enumerate() {
            let name = entry.name.clone();
            let device = entry.into_config().await.map_err(|e| ConfigError::Device {
                index,
                name,
                source: Box::new(e),
            })?;
            tracing::debug!(device = device.name(), address = %device.address(), "Device configured");
            devices.push(device);
        }

        let mail = file.mail.map(MailConfig::try_from).transpose()?;
        let webhook = file.webhook.map(WebhookConfig::try_from).transpose()?;

        Ok(Self {
            devices,
            mail,
            webhook,
        })
    }
}

impl DeviceEntry {
    async fn into_config(self) -> Result<DeviceConfig, ConfigError> {
        let address = resolve_address(&self.address).await?;
        let timeout_ms = self.timeout_ms.unwrap_or(self.max_scale_ms);

        DeviceConfig::new(
            address,
            self.name,
            Duration::from_millis(self.interval_ms),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(self.limit_ms),
            Duration::from_millis(self.max_scale_ms),
            &self.email,
        )
    }
}

/// Resolve hostname to IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, ConfigError> {
    let address = address.trim();

    // Try direct parse first
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolve_err = |reason: String| ConfigError::Resolve {
        address: address.to_string(),
        reason,
    };

    if address.is_empty() {
        return Err(resolve_err("empty address".into()));
    }

    tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| resolve_err(e.to_string()))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| resolve_err("no addresses found".into()))
}
