use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::state::AppState;

const ADMIN_RECORD_TTL_SECS: i64 = 180 * 24 * 60 * 60;
const RESET_TTL_SECS: i64 = 15 * 60;

/// Discriminates the three token families. A token of one kind never
/// verifies as another, even with a valid signature.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
    Session,
    AdminRecord,
    Reset,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
    pub typ: TokenKind,
    /// Only present on admin-record tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// Admin identity preserved client-side across store resets.
#[derive(Debug, Clone)]
pub struct AdminRecord {
    pub email: String,
    pub password_hash: String,
}

#[derive(Clone)]
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> Self {
        let auth = &state.config.auth;
        Self {
            encoding: EncodingKey::from_secret(auth.secret.as_bytes()),
            decoding: DecodingKey::from_secret(auth.secret.as_bytes()),
            session_ttl: Duration::from_secs(auth.session_ttl_secs),
        }
    }
}

impl AuthKeys {
    fn sign_with(
        &self,
        typ: TokenKind,
        subject: &str,
        ttl_secs: i64,
        password_hash: Option<String>,
    ) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl_secs);
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            typ,
            password_hash,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(subject = %subject, typ = ?typ, "token signed");
        Ok(token)
    }

    fn decode_kind(&self, token: &str, typ: TokenKind) -> Option<Claims> {
        let mut validation = Validation::default();
        // No clock-skew allowance: a token is invalid the second it expires.
        validation.leeway = 0;
        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .ok()?
            .claims;
        if claims.typ != typ || claims.sub.is_empty() {
            return None;
        }
        Some(claims)
    }

    pub fn sign_session(&self, subject: &str) -> anyhow::Result<String> {
        self.sign_with(
            TokenKind::Session,
            subject,
            self.session_ttl.as_secs() as i64,
            None,
        )
    }

    /// Returns the claims only for a well-formed, unexpired session token;
    /// `None` for every failure mode.
    pub fn verify_session(&self, token: &str) -> Option<Claims> {
        self.decode_kind(token, TokenKind::Session)
    }

    pub fn sign_admin_record(&self, email: &str, password_hash: &str) -> anyhow::Result<String> {
        self.sign_with(
            TokenKind::AdminRecord,
            email,
            ADMIN_RECORD_TTL_SECS,
            Some(password_hash.to_string()),
        )
    }

    pub fn verify_admin_record(&self, token: &str) -> Option<AdminRecord> {
        let claims = self.decode_kind(token, TokenKind::AdminRecord)?;
        let password_hash = claims.password_hash?;
        Some(AdminRecord {
            email: claims.sub,
            password_hash,
        })
    }

    pub fn sign_reset(&self, email: &str) -> anyhow::Result<String> {
        self.sign_with(TokenKind::Reset, email, RESET_TTL_SECS, None)
    }

    /// Returns the email the reset was issued for.
    pub fn verify_reset(&self, token: &str) -> Option<String> {
        self.decode_kind(token, TokenKind::Reset).map(|c| c.sub)
    }
}
