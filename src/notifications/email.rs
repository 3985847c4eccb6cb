//! SMTP delivery through lettre.

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{Mailer, OutgoingEmail};
use crate::config::EmailConfig;

/// Sends mail through the SMTP relay from the `[email]` config section
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = email.to.parse()?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )?;
        Ok(message)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;

        let builder = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            builder
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let message = self.build_message(email)?;
        self.transport()?.send(message).await?;

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email sent successfully"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
