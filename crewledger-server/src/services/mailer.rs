//! Outgoing email over SMTP (STARTTLS)

use async_trait::async_trait;
use crewledger_common::config::SmtpConfig;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

/// Email delivery errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("SMTP credentials not configured")]
    MissingCredentials,

    #[error("Invalid address {0:?}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),
}

/// A multipart/alternative message with plain and HTML bodies
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Delivers email
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// SMTP relay mailer
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn mailbox(raw: &str) -> Result<Mailbox, MailError> {
        raw.parse::<Mailbox>()
            .map_err(|_| MailError::InvalidAddress(raw.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        if self.config.user.is_empty() || self.config.password.is_empty() {
            return Err(MailError::MissingCredentials);
        }

        let from = Self::mailbox(&format!("CrewLedger <{}>", self.config.user))?;
        let to = Self::mailbox(&email.to)?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))
            .map_err(|e| MailError::Build(e.to_string()))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| MailError::Smtp(e.to_string()))?
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        tracing::info!(subject = %email.subject, "Email sent");
        Ok(())
    }
}
