use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::CaptchaConfig;

const SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Returns whether the token passed verification. Failures of any kind
    /// (missing secret, network error, provider rejection) are `false`,
    /// never an error.
    async fn verify(&self, token: &str) -> bool;
}

/// Cloudflare Turnstile verification.
pub struct TurnstileVerifier {
    client: reqwest::Client,
    secret: Option<String>,
    bypass: bool,
}

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
}

impl TurnstileVerifier {
    pub fn new(config: &CaptchaConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            secret: config.secret.clone(),
            bypass: config.bypass,
        }
    }
}

#[async_trait]
impl CaptchaVerifier for TurnstileVerifier {
    async fn verify(&self, token: &str) -> bool {
        if self.bypass {
            debug!("captcha verification bypassed");
            return true;
        }
        let Some(secret) = self.secret.as_deref() else {
            warn!("TURNSTILE_SECRET_KEY not set, rejecting captcha");
            return false;
        };
        if token.is_empty() {
            warn!("no captcha token provided");
            return false;
        }

        let result = self
            .client
            .post(SITEVERIFY_URL)
            .form(&[("secret", secret), ("response", token)])
            .send()
            .await;

        match result {
            Ok(res) => match res.json::<SiteverifyResponse>().await {
                Ok(body) => body.success,
                Err(e) => {
                    warn!(error = %e, "captcha response parse failed");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "captcha verification request failed");
                false
            }
        }
    }
}
