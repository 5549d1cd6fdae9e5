// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::db::CreateAccountOutcome;
use crate::error::{AppError, Result};
use crate::middleware::auth::{AuthUser, SESSION_COOKIE};
use crate::models::{MatchPrediction, RunState};
use crate::services::analysis::SlipImage;
use crate::services::purchase::PaymentStart;
use crate::services::session::Session;
use crate::AppState;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::WatchStream, StreamExt as _};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Upper bound for uploaded slip images (base64 inflates by a third).
const MAX_ANALYSIS_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MIME_TYPE: &str = "image/jpeg";
const SESSION_COOKIE_MAX_AGE_HOURS: i64 = 1;

/// API routes (require authentication via ID token).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/session", post(sign_in).delete(sign_out))
        .route("/api/register", post(register))
        .route("/api/balance", get(get_balance))
        .route("/api/balance/stream", get(balance_stream))
        .route(
            "/api/analysis",
            post(start_analysis)
                .get(get_analysis)
                .layer(DefaultBodyLimit::max(MAX_ANALYSIS_BODY_BYTES)),
        )
        .route("/api/analysis/reset", post(reset_analysis))
        .route("/api/payments/start", post(start_payment))
}

/// Subscribed session of the caller, signing in on demand.
async fn subscribed_session(state: &AppState, user: &AuthUser) -> Result<Arc<Session>> {
    match state.sessions.session(user.user_id()) {
        Some(session) if session.is_subscribed() => Ok(session),
        _ => state.sessions.sign_in(user.0.clone()).await,
    }
}

// ─── Session ─────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    pub email: Option<String>,
    /// `None` until the account record exists
    #[cfg_attr(feature = "binding-generation", ts(type = "number | null"))]
    pub credits: Option<i64>,
}

/// Sign in: establish the live balance subscription and set the session
/// cookie for EventSource clients.
async fn sign_in(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let session = state.sessions.sign_in(user.0.clone()).await?;
    let account = state.store.get_account(user.user_id()).await?;

    let jar = match bearer_token(&headers) {
        Some(token) => jar.add(session_cookie(&state, token.to_string())),
        None => jar,
    };

    Ok((
        jar,
        Json(SessionResponse {
            user_id: session.user_id().to_string(),
            email: session.identity().email.clone(),
            credits: account.map(|a| a.credits),
        }),
    ))
}

/// Sign out: stop the subscription and clear the cookie.
async fn sign_out(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    jar: CookieJar,
) -> (CookieJar, axum::http::StatusCode) {
    state.sessions.sign_out(user.user_id());
    let removal = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(removal), axum::http::StatusCode::NO_CONTENT)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let secure = state.config.api_url.starts_with("https://");
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(if secure { SameSite::None } else { SameSite::Lax })
        .max_age(time::Duration::hours(SESSION_COOKIE_MAX_AGE_HOURS))
        .build()
}

// ─── Registration ────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub created: bool,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub credits: i64,
}

/// Create the caller's account with trial credits (idempotent).
async fn register(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<RegisterResponse>> {
    let response = match state.sessions.register(&user.0).await? {
        CreateAccountOutcome::Created(record) => RegisterResponse {
            created: true,
            credits: record.credits,
        },
        CreateAccountOutcome::AlreadyExists(record) => RegisterResponse {
            created: false,
            credits: record.credits,
        },
    };
    Ok(Json(response))
}

// ─── Balance ─────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct BalanceResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub credits: i64,
}

/// One-shot authoritative balance read.
async fn get_balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<BalanceResponse>> {
    // Only an existing session is refreshed; a read never creates one
    let credits = match state.sessions.session(user.user_id()) {
        Some(session) => session.refresh_balance().await?,
        None => state.store.read(user.user_id()).await?,
    };
    Ok(Json(BalanceResponse { credits }))
}

/// Server-sent events with the live balance.
///
/// Each event carries `{"credits": n}`, or `{"credits": null}` once the
/// session is signed out.
async fn balance_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let session = subscribed_session(&state, &user).await?;

    let stream = WatchStream::new(session.subscribe()).map(|credits| {
        let data = serde_json::json!({ "credits": credits }).to_string();
        Ok(Event::default().event("balance").data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ─── Analysis ────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Base64 image data (a `data:` URL prefix is accepted)
    #[validate(length(min = 1))]
    pub image: String,
    #[validate(length(min = 1, max = 64))]
    pub mime_type: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AnalysisResponse {
    pub predictions: Vec<MatchPrediction>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub credits: i64,
}

/// Run an analysis and charge one credit on success.
async fn start_analysis(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let image = decode_image(&body)?;
    let session = state.sessions.for_analysis(user.0.clone());

    let outcome = state.analysis.analyze(session, image).await?;

    Ok(Json(AnalysisResponse {
        predictions: outcome.predictions,
        credits: outcome.balance,
    }))
}

fn decode_image(body: &AnalysisRequest) -> Result<SlipImage> {
    // data:image/png;base64,....
    let (data_url_mime, encoded) = match body.image.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => (
            prefix
                .strip_prefix("data:")
                .and_then(|p| p.strip_suffix(";base64"))
                .map(str::to_string),
            rest,
        ),
        _ => (None, body.image.as_str()),
    };

    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::BadRequest(format!("image is not valid base64: {e}")))?;

    let mime_type = body
        .mime_type
        .clone()
        .or(data_url_mime)
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

    if !mime_type.starts_with("image/") {
        return Err(AppError::BadRequest(format!(
            "unsupported mime type '{mime_type}'"
        )));
    }

    Ok(SlipImage { data, mime_type })
}

/// State of the caller's most recent analysis.
async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<RunState> {
    let run_state = state
        .sessions
        .session(user.user_id())
        .map(|s| s.run_state())
        .unwrap_or(RunState::Idle);
    Json(run_state)
}

/// Discard the current analysis state.
async fn reset_analysis(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<RunState> {
    if let Some(session) = state.sessions.session(user.user_id()) {
        session.reset_run();
    }
    Json(RunState::Idle)
}

// ─── Payments ────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartPaymentRequest {
    #[validate(length(min = 1, max = 32))]
    pub package_id: String,
}

/// Start a credit purchase for the caller.
async fn start_payment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<StartPaymentRequest>,
) -> Result<Json<PaymentStart>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let start = state.purchases.start(&user.0, &body.package_id).await?;
    Ok(Json(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(image: &str, mime_type: Option<&str>) -> AnalysisRequest {
        AnalysisRequest {
            image: image.to_string(),
            mime_type: mime_type.map(str::to_string),
        }
    }

    #[test]
    fn decode_image_accepts_raw_and_data_url() {
        let raw = decode_image(&request("AAEC", None)).unwrap();
        assert_eq!(raw.data, vec![0, 1, 2]);
        assert_eq!(raw.mime_type, DEFAULT_MIME_TYPE);

        let data_url = decode_image(&request("data:image/png;base64,AAEC", None)).unwrap();
        assert_eq!(data_url.data, vec![0, 1, 2]);
        assert_eq!(data_url.mime_type, "image/png");

        let explicit = decode_image(&request("AAEC", Some("image/webp"))).unwrap();
        assert_eq!(explicit.mime_type, "image/webp");
    }

    #[test]
    fn decode_image_rejects_bad_input() {
        assert!(matches!(
            decode_image(&request("not base64!", None)),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            decode_image(&request("AAEC", Some("application/pdf"))),
            Err(AppError::BadRequest(_))
        ));
    }
}
