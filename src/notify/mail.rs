//! Notification delivery via SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Notification, Notifier, NotifyError};
use crate::config::{AuthType, MailConfig, Security};

/// Mails each notification to the device's contact address.
pub struct MailNotifier {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl MailNotifier {
    /// Set up the SMTP transport. No connection is made until the first send.
    pub fn new(config: &MailConfig) -> Result<Self, NotifyError> {
        let mut builder = match config.security {
            Security::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
            }
            Security::SslTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?,
            Security::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            }
        }
        .port(config.port);

        if config.auth == AuthType::Password {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            from: Mailbox::new(None, config.from.clone()),
            transport: builder.build(),
        })
    }

    fn message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, notification.recipient.clone()))
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    fn name(&self) -> &'static str {
        "mail"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = self.message(notification)?;
        self.transport.send(message).await?;
        Ok(())
    }
}
