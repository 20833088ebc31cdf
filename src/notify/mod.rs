//! Alarm and clear notifications.
//!
//! A [`NotificationListener`] sits on one device and turns its Alarm and
//! Clear events into [`Notification`]s, handing each to every configured
//! [`Notifier`]. Delivery failures are logged and dropped.

mod mail;
mod webhook;

pub use mail::*;
pub use webhook::*;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::Address;

use crate::config::MonitorSettings;
use crate::device::{DeviceEvent, DeviceListener, EventKind, ResponseClass};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    Status(u16),
}

/// A message about a device entering or leaving the alarm state.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    pub device: String,
    pub address: IpAddr,
    pub recipient: Address,
    pub class: ResponseClass,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn alarm(event: &DeviceEvent, recipient: &Address) -> Self {
        let subject = format!("alarm: {} {}", event.device, event.address);
        let body = format!(
            "{} is not operating in expected parameters\nreason: {}\nplease investigate further",
            subject, event.class
        );
        Self::new(EventKind::Alarm, event, recipient, subject, body)
    }

    pub fn clear(event: &DeviceEvent, recipient: &Address) -> Self {
        let subject = format!("clear: {} {}", event.device, event.address);
        let body = format!(
            "{} operational within expected parameters\nprevious alarm state cleared",
            subject
        );
        Self::new(EventKind::Clear, event, recipient, subject, body)
    }

    fn new(
        kind: EventKind,
        event: &DeviceEvent,
        recipient: &Address,
        subject: String,
        body: String,
    ) -> Self {
        Self {
            kind,
            device: event.device.to_string(),
            address: event.address,
            recipient: recipient.clone(),
            class: event.class,
            subject,
            body,
            timestamp: event.timestamp,
        }
    }
}

/// A delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Build the notifiers enabled in `settings`.
pub fn notifiers_from_settings(
    settings: &MonitorSettings,
) -> Result<Vec<Arc<dyn Notifier>>, NotifyError> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(mail) = settings.mail.as_ref().filter(|m| m.enabled) {
        notifiers.push(Arc::new(MailNotifier::new(mail)?));
    }
    if let Some(webhook) = &settings.webhook {
        notifiers.push(Arc::new(WebhookNotifier::new(webhook)?));
    }
    Ok(notifiers)
}

/// Sends a notification for every Alarm and Clear of one device.
pub struct NotificationListener {
    recipient: Address,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationListener {
    pub fn new(recipient: Address, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            recipient,
            notifiers,
        }
    }

    async fn dispatch(&self, notification: Notification) {
        for notifier in &self.notifiers {
            match notifier.notify(&notification).await {
                Ok(()) => tracing::info!(
                    notifier = notifier.name(),
                    device = %notification.device,
                    to = %notification.recipient,
                    "Sent {}",
                    notification.subject
                ),
                Err(e) => tracing::error!(
                    notifier = notifier.name(),
                    device = %notification.device,
                    "Notification failed: {}",
                    e
                ),
            }
        }
    }
}

#[async_trait]
impl DeviceListener for NotificationListener {
    async fn on_alarm(&self, event: &DeviceEvent) {
        self.dispatch(Notification::alarm(event, &self.recipient)).await;
    }

    async fn on_clear(&self, event: &DeviceEvent) {
        self.dispatch(Notification::clear(event, &self.recipient)).await;
    }

    fn wants_replies(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthType, MailConfig, Security, WebhookConfig};
    use crate::testing::{event, RecordingNotifier};

    fn recipient() -> Address {
        "ops@example.com".parse().unwrap()
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Status(503))
        }
    }

    #[test]
    fn test_alarm_text() {
        let n = Notification::alarm(&event(EventKind::Alarm, ResponseClass::LimitExceeded), &recipient());
        assert_eq!(n.kind, EventKind::Alarm);
        assert_eq!(n.subject, "alarm: Test machine 127.0.0.1");
        assert_eq!(
            n.body,
            "alarm: Test machine 127.0.0.1 is not operating in expected parameters\n\
             reason: LIMIT_EXCEEDED\n\
             please investigate further"
        );
        assert_eq!(n.recipient, recipient());
    }

    #[test]
    fn test_clear_text() {
        let n = Notification::clear(&event(EventKind::Clear, ResponseClass::Normal), &recipient());
        assert_eq!(n.kind, EventKind::Clear);
        assert_eq!(n.subject, "clear: Test machine 127.0.0.1");
        assert_eq!(
            n.body,
            "clear: Test machine 127.0.0.1 operational within expected parameters\n\
             previous alarm state cleared"
        );
    }

    #[tokio::test]
    async fn test_listener_ignores_replies() {
        let recording = RecordingNotifier::new();
        let listener = NotificationListener::new(recipient(), vec![recording.clone()]);

        listener.on_reply(&event(EventKind::Reply, ResponseClass::Timeout)).await;
        listener.on_alarm(&event(EventKind::Alarm, ResponseClass::Timeout)).await;
        listener.on_clear(&event(EventKind::Clear, ResponseClass::Normal)).await;

        let kinds: Vec<_> = recording.sent().iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![EventKind::Alarm, EventKind::Clear]);
        assert!(!listener.wants_replies());
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_stop_others() {
        let recording = RecordingNotifier::new();
        let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(Failing), recording.clone()];
        let listener = NotificationListener::new(recipient(), notifiers);

        listener.on_alarm(&event(EventKind::Alarm, ResponseClass::NotReachable)).await;

        assert_eq!(recording.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_notifiers_from_settings() {
        let mail = MailConfig {
            enabled: false,
            smtp_host: "localhost".into(),
            port: 2525,
            security: Security::None,
            auth: AuthType::None,
            username: String::new(),
            password: String::new(),
            from: "pingmon@example.com".parse().unwrap(),
        };
        let mut settings = MonitorSettings {
            devices: Vec::new(),
            mail: Some(mail.clone()),
            webhook: None,
        };
        assert!(notifiers_from_settings(&settings).unwrap().is_empty());

        settings.mail = Some(MailConfig { enabled: true, ..mail });
        settings.webhook = Some(WebhookConfig {
            url: "http://127.0.0.1:9/hook".parse().unwrap(),
        });
        let names: Vec<_> = notifiers_from_settings(&settings)
            .unwrap()
            .iter()
            .map(|n| n.name())
            .collect();
        assert_eq!(names, vec!["mail", "webhook"]);
    }
}
