use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::gate::AdminUser;
use crate::auth::handlers::is_valid_email;
use crate::error::ApiError;
use crate::quotes::dto::{OkResponse, QuoteRequest, StoredQuote, SubmittedResponse};
use crate::state::AppState;

const INDEX_KEY: &str = "devis_submissions";

fn quote_key(id: impl std::fmt::Display) -> String {
    format!("devis:{id}")
}

pub fn quote_routes() -> Router<AppState> {
    Router::new()
        .route("/devis", get(list_quotes).post(submit_quote))
        .route("/devis/:id", delete(delete_quote))
}

#[instrument(skip(state, payload))]
pub async fn submit_quote(
    State(state): State<AppState>,
    Json(payload): Json<QuoteRequest>,
) -> Result<(StatusCode, Json<SubmittedResponse>), ApiError> {
    if !state
        .captcha
        .verify(payload.captcha_token.as_deref().unwrap_or(""))
        .await
    {
        return Err(ApiError::BadRequest("Invalid captcha".into()));
    }

    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Name required".into()))?
        .to_string();
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .map(str::to_lowercase)
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| ApiError::BadRequest("Invalid email".into()))?;

    let quote = StoredQuote {
        id: Uuid::new_v4(),
        event_type: payload.event_type,
        services: payload.services,
        event_date: payload.event_date,
        guest_count: payload.guest_count,
        location: payload.location,
        name,
        email,
        phone: payload.phone,
        company: payload.company,
        description: payload.description,
        created_at: OffsetDateTime::now_utc(),
    };

    let raw = serde_json::to_string(&quote).map_err(anyhow::Error::from)?;
    state.kv.set(&quote_key(quote.id), &raw).await?;
    state.kv.sadd(INDEX_KEY, &quote.id.to_string()).await?;
    info!(id = %quote.id, email = %quote.email, "quote request stored");

    // Emails are best-effort: the submission is already persisted, so a
    // mail-provider outage must not fail the request.
    if let Some(notify) = state.mailer.notify_address().map(str::to_string) {
        if let Err(e) = state
            .mailer
            .send(&notify, "New quote request", &notification_html(&quote))
            .await
        {
            warn!(error = %e, id = %quote.id, "quote notification email failed");
        }
    }
    if let Err(e) = state
        .mailer
        .send(
            &quote.email,
            "Thank you for your request",
            &confirmation_html(&quote.name),
        )
        .await
    {
        warn!(error = %e, id = %quote.id, "quote confirmation email failed");
    }

    Ok((
        StatusCode::CREATED,
        Json(SubmittedResponse {
            success: true,
            id: quote.id,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn list_quotes(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<StoredQuote>>, ApiError> {
    let ids = state.kv.smembers(INDEX_KEY).await?;
    let mut quotes = Vec::with_capacity(ids.len());
    for id in ids {
        match state.kv.get(&quote_key(&id)).await? {
            Some(raw) => match serde_json::from_str::<StoredQuote>(&raw) {
                Ok(quote) => quotes.push(quote),
                Err(e) => warn!(%id, error = %e, "skipping unparsable quote record"),
            },
            None => warn!(%id, "skipping dangling quote index entry"),
        }
    }
    quotes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(quotes))
}

#[instrument(skip(state))]
pub async fn delete_quote(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    let key = quote_key(id);
    if state.kv.get(&key).await?.is_none() {
        return Err(ApiError::NotFound("Quote request not found".into()));
    }
    state.kv.del(&key).await?;
    state.kv.srem(INDEX_KEY, &id.to_string()).await?;
    info!(%id, "quote request deleted");
    Ok(Json(OkResponse { success: true }))
}

fn notification_html(quote: &StoredQuote) -> String {
    let services = if quote.services.is_empty() {
        "<li>Not specified</li>".to_string()
    } else {
        quote
            .services
            .iter()
            .map(|s| format!("<li>{s}</li>"))
            .collect()
    };
    format!(
        "<h1>New quote request</h1>\
         <h2>Contact</h2>\
         <p><strong>Name:</strong> {name}</p>\
         <p><strong>Email:</strong> {email}</p>\
         <p><strong>Phone:</strong> {phone}</p>\
         <p><strong>Company:</strong> {company}</p>\
         <h2>Event</h2>\
         <p><strong>Type:</strong> {event_type}</p>\
         <p><strong>Date:</strong> {event_date}</p>\
         <p><strong>Guests:</strong> {guest_count}</p>\
         <p><strong>Location:</strong> {location}</p>\
         <h2>Requested services</h2>\
         <ul>{services}</ul>\
         <h2>Description</h2>\
         <p>{description}</p>",
        name = quote.name,
        email = quote.email,
        phone = quote.phone,
        company = quote.company,
        event_type = quote.event_type,
        event_date = quote.event_date,
        guest_count = quote.guest_count,
        location = quote.location,
        services = services,
        description = quote.description.replace('\n', "<br>"),
    )
}

fn confirmation_html(name: &str) -> String {
    format!(
        "<h1>Thank you for your request!</h1>\
         <p>Hello {name},</p>\
         <p>We received your quote request and will get back to you within 48 hours.</p>"
    )
}
