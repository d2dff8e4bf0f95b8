//! Outbound email.
//!
//! `MailgunMailer` posts form-encoded messages to the Mailgun HTTP API with
//! basic auth (`api:<key>`). `LogMailer` only logs, and is used when email
//! is disabled.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

const MAILGUN_API_BASE: &str = "https://api.mailgun.net/v3";

#[derive(Error, Debug)]
pub enum MailError {
    #[error("missing email credentials")]
    MissingCredentials,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mail API error {status}: {body}")]
    ApiError { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

pub const THRESHOLD_SUBJECT: &str = "Inter Vault Alert: Collateralization Level Breached";

/// Alert for a vault whose ratio fell to or below a notifier threshold.
pub fn threshold_breached(to: &str, asset: &str, vault_id: u64, threshold: u32) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: THRESHOLD_SUBJECT.to_string(),
        text: format!(
            "Your {asset} vault #{vault_id}, has crossed below the {threshold}% collateralization level."
        ),
    }
}

pub struct MailgunMailer {
    api_key: String,
    domain: String,
    from: String,
    base_url: String,
    client: reqwest::Client,
}

impl MailgunMailer {
    pub fn new(api_key: &str, domain: &str, from: &str) -> Result<Self, MailError> {
        if api_key.is_empty() || domain.is_empty() {
            return Err(MailError::MissingCredentials);
        }
        Ok(Self {
            api_key: api_key.to_string(),
            domain: domain.to_string(),
            from: from.to_string(),
            base_url: MAILGUN_API_BASE.to_string(),
            client: reqwest::Client::new(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.domain)
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let form = [
            ("from", self.from.as_str()),
            ("to", message.to.as_str()),
            ("subject", message.subject.as_str()),
            ("text", message.text.as_str()),
        ];
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        debug!(to = %message.to, "email accepted by Mailgun");
        Ok(())
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, text = %message.text, "email (not sent)");
        Ok(())
    }
}
