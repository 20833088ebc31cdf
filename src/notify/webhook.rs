//! Notification delivery via HTTP POST.

use std::time::Duration;

use async_trait::async_trait;

use super::{Notification, Notifier, NotifyError};
use crate::config::WebhookConfig;

/// HTTP request timeout for a single delivery.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts each notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

fn payload(notification: &Notification) -> serde_json::Value {
    serde_json::json!({
        "kind": notification.kind,
        "device": notification.device,
        "address": notification.address,
        "recipient": notification.recipient.to_string(),
        "class": notification.class,
        "subject": notification.subject,
        "body": notification.body,
        "timestamp": notification.timestamp,
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload(notification))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
