use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::MailConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()>;

    /// Address that receives internal notifications (new quote requests).
    fn notify_address(&self) -> Option<&str>;
}

/// Sends through an HTTP transactional-mail API.
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            config,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let res = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_token)
            .json(&json!({
                "from": self.config.from_email,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .context("mail api request")?;

        if !res.status().is_success() {
            anyhow::bail!("mail api returned {}", res.status());
        }
        info!(%to, %subject, "email sent");
        Ok(())
    }

    fn notify_address(&self) -> Option<&str> {
        Some(&self.config.notify_email)
    }
}

/// Used when no mail provider is configured: logs and drops the message.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> anyhow::Result<()> {
        info!(%to, %subject, "mail provider not configured, dropping email");
        Ok(())
    }

    fn notify_address(&self) -> Option<&str> {
        None
    }
}
