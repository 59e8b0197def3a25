use std::sync::Arc;

use tracing::warn;

use crate::captcha::{CaptchaVerifier, TurnstileVerifier};
use crate::config::AppConfig;
use crate::kv::{KvStore, MemoryKv, RedisKv};
use crate::mailer::{HttpMailer, Mailer, NoopMailer};
use crate::users::store::UserStore;

#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub captcha: Arc<dyn CaptchaVerifier>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let kv: Arc<dyn KvStore> = match config.kv_url.as_deref() {
            Some(url) => Arc::new(RedisKv::connect(url).await?),
            None => {
                warn!("no REDIS_URL/KV_URL configured, falling back to in-memory store");
                Arc::new(MemoryKv::new())
            }
        };

        let mailer: Arc<dyn Mailer> = match config.mail.clone() {
            Some(mail) => Arc::new(HttpMailer::new(mail)),
            None => {
                warn!("mail provider not configured, emails will be dropped");
                Arc::new(NoopMailer)
            }
        };

        let captcha = Arc::new(TurnstileVerifier::new(&config.captcha));

        Ok(Self {
            kv,
            config,
            mailer,
            captcha,
        })
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.kv.clone())
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        use crate::config::{AuthConfig, CaptchaConfig};

        let config = Arc::new(AppConfig {
            production: false,
            auth: AuthConfig {
                secret: "test-secret".into(),
                session_ttl_secs: 3600,
            },
            kv_url: None,
            mail: None,
            captcha: CaptchaConfig {
                secret: None,
                bypass: true,
            },
            public_url: "http://localhost:8080".into(),
        });

        Self {
            kv: Arc::new(MemoryKv::new()),
            config: config.clone(),
            mailer: Arc::new(NoopMailer),
            captcha: Arc::new(TurnstileVerifier::new(&config.captcha)),
        }
    }
}
