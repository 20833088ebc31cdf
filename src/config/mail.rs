//! SMTP and webhook notification settings.

use std::fmt;

use lettre::Address;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Default SMTP port (STARTTLS submission).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Transport security used towards the SMTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Security {
    /// Plain text connection
    None,
    /// Implicit TLS from the first byte (usually port 465)
    SslTls,
    /// Upgrade a plain connection with STARTTLS
    #[default]
    Starttls,
}

/// Authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Password,
}

/// `mail` section of the monitor file, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub auth: AuthType,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_SMTP_PORT
}

/// Validated SMTP configuration.
#[derive(Clone)]
pub struct MailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub port: u16,
    pub security: Security,
    pub auth: AuthType,
    pub username: String,
    pub password: String,
    pub from: Address,
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("enabled", &self.enabled)
            .field("smtp_host", &self.smtp_host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("auth", &self.auth)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

impl TryFrom<MailSettings> for MailConfig {
    type Error = ConfigError;

    fn try_from(s: MailSettings) -> Result<Self, Self::Error> {
        if s.smtp_host.trim().is_empty() {
            return Err(ConfigError::Mail("smtp_host must not be empty".into()));
        }
        if s.auth == AuthType::Password && (s.username.is_empty() || s.password.is_empty()) {
            return Err(ConfigError::Mail(
                "username and password are required with password authentication".into(),
            ));
        }
        let from = s.from.trim().parse::<Address>().map_err(|source| ConfigError::Email {
            address: s.from.clone(),
            source,
        })?;

        Ok(Self {
            enabled: s.enabled,
            smtp_host: s.smtp_host,
            port: s.port,
            security: s.security,
            auth: s.auth,
            username: s.username,
            password: s.password,
            from,
        })
    }
}

/// `webhook` section of the monitor file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookSettings {
    pub url: String,
}

/// Validated webhook target.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: reqwest::Url,
}

impl TryFrom<WebhookSettings> for WebhookConfig {
    type Error = ConfigError;

    fn try_from(s: WebhookSettings) -> Result<Self, Self::Error> {
        let url = reqwest::Url::parse(&s.url).map_err(|e| ConfigError::Webhook {
            url: s.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Webhook {
                url: s.url,
                reason: "scheme must be http or https".into(),
            });
        }
        Ok(Self { url })
    }
}
