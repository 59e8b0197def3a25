use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;

/// Development-only signing secret, used when AUTH_SECRET is not set outside
/// of production.
const INSECURE_DEV_SECRET: &str = "fallback-secret-use-AUTH_SECRET";

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub secret: String,
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub api_url: String,
    pub api_token: String,
    pub from_email: String,
    pub notify_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaConfig {
    pub secret: Option<String>,
    pub bypass: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub production: bool,
    pub auth: AuthConfig,
    pub kv_url: Option<String>,
    pub mail: Option<MailConfig>,
    pub captcha: CaptchaConfig,
    /// Origin used when building links sent by email.
    pub public_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let secret = match std::env::var("AUTH_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                if production {
                    anyhow::bail!("AUTH_SECRET must be set in production");
                }
                warn!("AUTH_SECRET not set, using an INSECURE fallback secret");
                INSECURE_DEV_SECRET.to_string()
            }
        };

        let session_ttl_secs = std::env::var("SESSION_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);

        let kv_url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("KV_URL"))
            .ok()
            .filter(|v| !v.is_empty());

        let mail = match (
            std::env::var("MAIL_API_URL").ok(),
            std::env::var("MAIL_API_TOKEN").ok(),
            std::env::var("FROM_EMAIL").ok(),
        ) {
            (Some(api_url), Some(api_token), Some(from_email)) => Some(MailConfig {
                notify_email: std::env::var("ADMIN_NOTIFY_EMAIL")
                    .unwrap_or_else(|_| from_email.clone()),
                api_url,
                api_token,
                from_email,
            }),
            _ => None,
        };

        let captcha = CaptchaConfig {
            secret: std::env::var("TURNSTILE_SECRET_KEY").ok().filter(|v| !v.is_empty()),
            bypass: std::env::var("CAPTCHA_BYPASS")
                .map(|v| v == "true")
                .unwrap_or(false),
        };

        let public_url = std::env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            production,
            auth: AuthConfig {
                secret,
                session_ttl_secs,
            },
            kv_url,
            mail,
            captcha,
            public_url,
        })
    }
}
