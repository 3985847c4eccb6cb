//! Outbound email.
//!
//! Handlers never send mail directly: they queue an [`OutgoingEmail`] in the
//! job table inside the same transaction as the state change, and the job
//! runner hands it to the configured [`Mailer`].

pub mod email;
pub mod templates;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EmailConfig;

pub use email::SmtpMailer;

/// A rendered email with HTML and plain-text bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;

    /// Name used in logs and startup checks
    fn name(&self) -> &'static str;
}

/// Mailer used when SMTP is not configured: logs and drops every message
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        tracing::warn!(
            to = %email.to,
            subject = %email.subject,
            "Email not configured, skipping email"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Pick the SMTP mailer when configured, otherwise the logging fallback
pub fn mailer_from_config(config: &EmailConfig) -> Arc<dyn Mailer> {
    if config.is_configured() {
        Arc::new(SmtpMailer::new(config.clone()))
    } else {
        Arc::new(LogMailer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailer_selection() {
        let mut config = EmailConfig::default();
        assert_eq!(mailer_from_config(&config).name(), "log");

        config.smtp_host = Some("smtp.example.com".to_string());
        config.from_address = Some("orders@example.com".to_string());
        assert_eq!(mailer_from_config(&config).name(), "smtp");
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        let email = OutgoingEmail {
            to: "someone@example.com".to_string(),
            subject: "Hello".to_string(),
            html: "<p>Hello</p>".to_string(),
            text: "Hello".to_string(),
        };
        LogMailer.send(&email).await.unwrap();
    }

    #[test]
    fn test_outgoing_email_survives_json_payload() {
        let email = OutgoingEmail {
            to: "a@example.com".to_string(),
            subject: "Order placed".to_string(),
            html: "<b>x</b>".to_string(),
            text: "x".to_string(),
        };
        let value = serde_json::to_value(&email).unwrap();
        let back: OutgoingEmail = serde_json::from_value(value).unwrap();
        assert_eq!(back, email);
    }
}
