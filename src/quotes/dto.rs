use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Quote-request form submission from the public site.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub event_date: String,
    #[serde(default)]
    pub guest_count: String,
    #[serde(default)]
    pub location: String,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

/// Submission as persisted under `devis:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQuote {
    pub id: Uuid,
    pub event_type: String,
    pub services: Vec<String>,
    pub event_date: String,
    pub guest_count: String,
    pub location: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct SubmittedResponse {
    pub success: bool,
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}
