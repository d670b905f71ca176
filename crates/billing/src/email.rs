//! Billing email notifications
//!
//! Delivery is best effort: every send logs its failure and reports a boolean,
//! no error ever reaches the ledger workflows.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use commonpot_shared::Config;
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::models::{Account, Payment, Token};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// A templated message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

/// Outbound mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> BillingResult<()>;
}

#[derive(Serialize)]
struct ResendAttachment {
    filename: String,
    content: String,
}

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ResendAttachment>,
}

/// Mailer backed by the Resend HTTP API
#[derive(Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> BillingResult<()> {
        let mut attachments = Vec::new();
        if let Some(path) = &message.attachment {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| BillingError::Email(format!("{}: {}", path.display(), e)))?;
            attachments.push(ResendAttachment {
                filename: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "invoice".to_string()),
                content: base64::engine::general_purpose::STANDARD.encode(bytes),
            });
        }

        let payload = ResendEmail {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            text: &message.body,
            attachments,
        };

        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Email(format!("{}: {}", status, body)));
        }

        Ok(())
    }
}

/// Format minor units as euros
pub fn format_amount(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02} €", sign, abs / 100, abs % 100)
}

/// Renders and sends the billing notifications
#[derive(Clone)]
pub struct BillingEmailService {
    mailer: Option<Arc<dyn Mailer>>,
    base_url: String,
}

impl BillingEmailService {
    pub fn new(mailer: Arc<dyn Mailer>, base_url: impl Into<String>) -> Self {
        Self {
            mailer: Some(mailer),
            base_url: base_url.into(),
        }
    }

    /// Service that logs and skips every send
    pub fn disabled(base_url: impl Into<String>) -> Self {
        Self {
            mailer: None,
            base_url: base_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.mail_enabled() {
            Self::new(
                Arc::new(ResendMailer::new(&config.resend_api_key, &config.mail_from)),
                &config.app_base_url,
            )
        } else {
            tracing::warn!("Billing email notifications not configured (missing RESEND_API_KEY)");
            Self::disabled(&config.app_base_url)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mailer.is_some()
    }

    fn login_url(&self, token: &Token) -> String {
        format!("{}/login?token={}", self.base_url, token.token)
    }

    async fn deliver(&self, message: EmailMessage, kind: &str) -> bool {
        let Some(mailer) = &self.mailer else {
            tracing::warn!(to = %message.to, kind, "Email not configured, skipping");
            return false;
        };

        match mailer.send(&message).await {
            Ok(()) => {
                tracing::info!(to = %message.to, kind, "Sent billing email");
                true
            }
            Err(e) => {
                tracing::error!(to = %message.to, kind, error = %e, "Failed to send billing email");
                false
            }
        }
    }

    /// Tell the payer their invoice is available
    pub async fn send_invoice(
        &self,
        account: &Account,
        payment: &Payment,
        attachment: Option<PathBuf>,
    ) -> bool {
        let number = payment.invoice_number.as_deref().unwrap_or("-");
        let subject = format!("Your invoice {}", number);
        let body = format!(
            "Hello,\n\nThank you for your payment of {}.\n\
             Your invoice {} is {}.\n\nSee you soon!\n",
            format_amount(payment.amount),
            number,
            if attachment.is_some() {
                "attached to this email"
            } else {
                "available from your account"
            }
        );

        self.deliver(
            EmailMessage {
                to: account.email.clone(),
                subject,
                body,
                attachment,
            },
            "invoice",
        )
        .await
    }

    pub async fn send_subscription_ending(
        &self,
        account: &Account,
        days_remaining: i64,
        token: &Token,
    ) -> bool {
        let body = format!(
            "Hello,\n\nYour subscription ends in {} days.\n\
             Renew it from your account:\n{}\n\n\
             This link is valid for 24 hours.\n",
            days_remaining,
            self.login_url(token)
        );

        self.deliver(
            EmailMessage {
                to: account.email.clone(),
                subject: "Your subscription is ending soon".to_string(),
                body,
                attachment: None,
            },
            "subscription_ending",
        )
        .await
    }

    pub async fn send_subscription_ended(&self, account: &Account, token: &Token) -> bool {
        let body = format!(
            "Hello,\n\nYour subscription ended yesterday.\n\
             You can renew it from your account:\n{}\n\n\
             This link is valid for 24 hours.\n",
            self.login_url(token)
        );

        self.deliver(
            EmailMessage {
                to: account.email.clone(),
                subject: "Your subscription has ended".to_string(),
                body,
                attachment: None,
            },
            "subscription_ended",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completed_payment, RecordingMailer};
    use time::macros::datetime;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1200), "12.00 €");
        assert_eq!(format_amount(5), "0.05 €");
        assert_eq!(format_amount(-350), "-3.50 €");
    }

    #[tokio::test]
    async fn test_disabled_service_skips() {
        let service = BillingEmailService::disabled("http://localhost");
        let now = datetime!(2024-03-10 08:00 UTC);
        let account = Account::new("a@example.org", now, now).unwrap();

        assert!(!service.is_enabled());
        assert!(!service.send_invoice(&account, &completed_payment("2024-03-0001"), None).await);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let mailer = Arc::new(RecordingMailer::failing());
        let service = BillingEmailService::new(mailer.clone(), "http://localhost");
        let now = datetime!(2024-03-10 08:00 UTC);
        let account = Account::new("a@example.org", now, now).unwrap();

        assert!(!service.send_invoice(&account, &completed_payment("2024-03-0001"), None).await);
        assert_eq!(mailer.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_ending_email_contains_login_link() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = BillingEmailService::new(mailer.clone(), "https://pay.example.org");
        let now = datetime!(2024-03-10 08:00 UTC);
        let account = Account::new("a@example.org", now, now).unwrap();
        let token = Token::generate(now, time::Duration::hours(24)).unwrap();

        assert!(service.send_subscription_ending(&account, 7, &token).await);

        let sent = mailer.sent().await;
        assert_eq!(sent[0].to, "a@example.org");
        assert!(sent[0].body.contains("7 days"));
        assert!(sent[0]
            .body
            .contains(&format!("https://pay.example.org/login?token={}", token.token)));
    }
}
