use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use alarmd_core::config::MailConfig;

use crate::error::TriggerError;

/// A rendered notification ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait MailSender: Send + Sync + 'static {
    async fn send(&self, mail: &Mail) -> Result<(), TriggerError>;
}

fn is_valid_email(target: &str) -> bool {
    let trimmed = target.trim();
    let Some((local, domain)) = trimmed.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
}

enum Transport {
    Noop,
    Unconfigured,
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
}

/// SMTP delivery through lettre. The transport is built once from
/// [`MailConfig`] and reused for every alarm.
pub struct SmtpMailSender {
    transport: Transport,
}

impl SmtpMailSender {
    pub fn from_config(config: &MailConfig) -> Self {
        if config.smtp_noop {
            info!("SMTP noop transport enabled; alarm emails are logged, not sent");
            return Self {
                transport: Transport::Noop,
            };
        }
        let Some(host) = config.smtp_host.as_deref() else {
            return Self {
                transport: Transport::Unconfigured,
            };
        };
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(5)));
        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Self {
            transport: Transport::Smtp(builder.build()),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.transport, Transport::Noop)
    }
}

pub(crate) fn build_message(mail: &Mail) -> Result<Message, TriggerError> {
    let from: Mailbox = mail
        .from
        .parse()
        .map_err(|_| TriggerError::Send(format!("invalid sender address {}", mail.from)))?;
    let mut builder = Message::builder().from(from).subject(mail.subject.clone());
    for target in &mail.to {
        if !is_valid_email(target) {
            return Err(TriggerError::Send(format!("invalid email target {target}")));
        }
        let to: Mailbox = target
            .parse()
            .map_err(|_| TriggerError::Send(format!("invalid email target {target}")))?;
        builder = builder.to(to);
    }
    builder
        .multipart(MultiPart::alternative_plain_html(
            mail.text.clone(),
            mail.html.clone(),
        ))
        .map_err(|e| TriggerError::Send(format!("smtp message build failed: {e}")))
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, mail: &Mail) -> Result<(), TriggerError> {
        let message = build_message(mail)?;
        match &self.transport {
            Transport::Noop => {
                info!(to = ?mail.to, subject = %mail.subject, "SMTP noop: alarm email not dispatched");
                Ok(())
            }
            Transport::Unconfigured => Err(TriggerError::Send(
                "smtp host is not configured".to_string(),
            )),
            Transport::Smtp(mailer) => {
                mailer
                    .send(message)
                    .await
                    .map_err(|e| TriggerError::Send(format!("smtp send failed: {e}")))?;
                debug!(to = ?mail.to, "alarm email sent");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(to: &str) -> Mail {
        Mail {
            from: "no-reply@example.org".to_string(),
            to: vec![to.to_string()],
            subject: "Notification: Standup".to_string(),
            text: "This event is about to begin in 15 minutes".to_string(),
            html: "<p>This event is about to begin in 15 minutes</p>".to_string(),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("bob@example.org"));
        assert!(!is_valid_email("bob"));
        assert!(!is_valid_email("@example.org"));
        assert!(!is_valid_email("bob@localhost"));
        assert!(!is_valid_email("bob@.org"));
    }

    #[test]
    fn message_is_multipart_alternative() {
        let message = build_message(&mail("bob@example.org")).expect("message");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("Subject: Notification: Standup"));
    }

    #[test]
    fn invalid_recipient_is_a_send_error() {
        assert!(matches!(
            build_message(&mail("not-an-address")),
            Err(TriggerError::Send(_))
        ));
    }

    #[tokio::test]
    async fn noop_transport_reports_success() {
        let sender = SmtpMailSender::from_config(&MailConfig {
            smtp_noop: true,
            ..MailConfig::default()
        });
        assert!(sender.is_noop());
        sender.send(&mail("bob@example.org")).await.expect("noop send");
    }

    #[tokio::test]
    async fn missing_host_fails_at_send_time() {
        let sender = SmtpMailSender::from_config(&MailConfig::default());
        let err = sender
            .send(&mail("bob@example.org"))
            .await
            .expect_err("no host");
        assert!(matches!(err, TriggerError::Send(ref m) if m.contains("not configured")));
    }
}
