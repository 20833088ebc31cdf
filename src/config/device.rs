//! Per-device monitoring configuration.

use std::net::IpAddr;
use std::time::Duration;

use lettre::Address;

use super::ConfigError;

/// Lowest accepted probe interval. Anything faster floods the target.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// How a single network device is monitored.
///
/// Instances are validated on construction and immutable afterwards, so every
/// `DeviceConfig` in circulation satisfies `timeout >= limit <= max_scale`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    address: IpAddr,
    name: String,
    interval: Duration,
    timeout: Duration,
    limit: Duration,
    max_scale: Duration,
    email: Address,
}

impl DeviceConfig {
    /// Build a validated device configuration.
    ///
    /// * `interval` - time between two probes, at least [`MIN_INTERVAL`]
    /// * `timeout` - how long a probe may take before it counts as timed out
    /// * `limit` - highest acceptable round-trip time
    /// * `max_scale` - round-trip time shown as 100% by a view
    /// * `email` - recipient of alarm and clear notifications
    pub fn new(
        address: IpAddr,
        name: impl Into<String>,
        interval: Duration,
        timeout: Duration,
        limit: Duration,
        max_scale: Duration,
        email: &str,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if interval < MIN_INTERVAL {
            return Err(ConfigError::IntervalTooShort(interval));
        }
        if limit.is_zero() {
            return Err(ConfigError::ZeroLimit);
        }
        if timeout < limit {
            return Err(ConfigError::TimeoutBelowLimit { timeout, limit });
        }
        if max_scale < limit {
            return Err(ConfigError::ScaleBelowLimit { max_scale, limit });
        }
        let email = email.trim().parse::<Address>().map_err(|source| ConfigError::Email {
            address: email.to_string(),
            source,
        })?;

        Ok(Self {
            address,
            name,
            interval,
            timeout,
            limit,
            max_scale,
            email,
        })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn max_scale(&self) -> Duration {
        self.max_scale
    }

    pub fn email(&self) -> &Address {
        &self.email
    }
}
