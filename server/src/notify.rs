//! Staff email when a new conversation opens. Delivery is best effort: the
//! caller records the outcome next to the conversation instead of failing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::{Config, SmtpConfig};
use crate::error::{ChatError, ChatResult};
use crate::templates::{render_notification_html, NotificationContext};
use crate::types::ConversationRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversationNotice {
    pub user_name: Option<String>,
    pub user_email: String,
    pub first_message: String,
    pub page_path: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ConversationRequest> for NewConversationNotice {
    fn from(request: &ConversationRequest) -> Self {
        Self {
            user_name: request.user_name.clone(),
            user_email: request.user_email.clone(),
            first_message: request.first_message.clone(),
            page_path: request.page_path.clone(),
            created_at: request.created_at,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_new_conversation(&self, notice: &NewConversationNotice) -> ChatResult<()>;
}

pub fn notification_subject(user_email: &str) -> String {
    format!("New Client LiveChat Request: {user_email}")
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    logo_url: String,
}

fn parse_mailbox(value: &str, setting: &str) -> ChatResult<Mailbox> {
    value
        .parse::<Mailbox>()
        .map_err(|err| ChatError::Config(format!("{setting} is not a valid address: {err}")))
}

impl SmtpNotifier {
    pub fn new(smtp: &SmtpConfig, logo_url: impl Into<String>) -> ChatResult<Self> {
        let builder = if smtp.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        };
        let builder =
            builder.map_err(|err| ChatError::Config(format!("invalid SMTP_HOST: {err}")))?;

        let transport = builder
            .port(smtp.port)
            .credentials(Credentials::new(smtp.user.clone(), smtp.pass.clone()))
            .build();

        Ok(Self {
            transport,
            from: parse_mailbox(&smtp.from, "SMTP_FROM")?,
            to: parse_mailbox(&smtp.notify_to, "LIVE_CHAT_NOTIFICATION_EMAIL")?,
            logo_url: logo_url.into(),
        })
    }

    fn build_message(&self, notice: &NewConversationNotice) -> ChatResult<Message> {
        let time = notice.created_at.to_rfc3339();
        let html = render_notification_html(&NotificationContext {
            user_name: notice.user_name.as_deref(),
            user_email: &notice.user_email,
            page_path: &notice.page_path,
            time: &time,
            first_message: &notice.first_message,
            logo_url: &self.logo_url,
        });
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notification_subject(&notice.user_email))
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|err| ChatError::upstream(format!("failed to build notification email: {err}")))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify_new_conversation(&self, notice: &NewConversationNotice) -> ChatResult<()> {
        let message = self.build_message(notice)?;
        self.transport
            .send(message)
            .await
            .map_err(|err| ChatError::upstream(format!("SMTP delivery failed: {err}")))?;
        tracing::info!(user_email = %notice.user_email, "live chat notification sent");
        Ok(())
    }
}

/// Used when SMTP is not fully configured; every attempt reports why.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify_new_conversation(&self, _notice: &NewConversationNotice) -> ChatResult<()> {
        Err(ChatError::upstream("SMTP is not configured"))
    }
}

pub fn build_notifier(config: &Config) -> ChatResult<Arc<dyn Notifier>> {
    match &config.smtp {
        Some(smtp) => Ok(Arc::new(SmtpNotifier::new(smtp, config.logo_url.clone())?)),
        None => {
            tracing::warn!("SMTP is not configured; live chat notifications are disabled");
            Ok(Arc::new(DisabledNotifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            secure: false,
            user: "bot".into(),
            pass: "pw".into(),
            from: "Live Chat <bot@example.com>".into(),
            notify_to: "team@example.com".into(),
        }
    }

    fn notice() -> NewConversationNotice {
        NewConversationNotice {
            user_name: Some("Casey".into()),
            user_email: "c@d.com".into(),
            first_message: "Need a quote".into(),
            page_path: "/".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn subject_names_the_client() {
        assert_eq!(
            notification_subject("c@d.com"),
            "New Client LiveChat Request: c@d.com"
        );
    }

    #[tokio::test]
    async fn builds_an_html_message() {
        let notifier = SmtpNotifier::new(&smtp(), "https://example.com/logo.png").unwrap();
        let message = notifier.build_message(&notice()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: New Client LiveChat Request: c@d.com"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("team@example.com"));
    }

    #[test]
    fn rejects_bad_addresses() {
        let mut cfg = smtp();
        cfg.notify_to = "not an address".into();
        assert!(matches!(
            SmtpNotifier::new(&cfg, ""),
            Err(ChatError::Config(_))
        ));
    }

    #[tokio::test]
    async fn disabled_notifier_reports_missing_smtp() {
        let err = DisabledNotifier
            .notify_new_conversation(&notice())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "SMTP is not configured");
    }
}
