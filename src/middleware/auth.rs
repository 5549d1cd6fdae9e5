// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! ID token authentication middleware.

use crate::error::AppError;
use crate::services::identity::{IdTokenError, VerifiedIdentity};
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Cookie carrying the ID token for clients that cannot set headers
/// (EventSource).
pub const SESSION_COOKIE: &str = "session_token";

/// Authenticated user extracted from the ID token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub VerifiedIdentity);

impl AuthUser {
    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }
}

/// Middleware that requires a valid ID token.
///
/// The `Authorization: Bearer` header wins; the session cookie is the
/// fallback.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let header_token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    let token = match header_token.or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
    {
        Some(token) if !token.is_empty() => token,
        _ => return AppError::Unauthorized.into_response(),
    };

    let identity = match state.verifier.verify(&token).await {
        Ok(identity) => identity,
        Err(IdTokenError::Forbidden(reason)) => {
            tracing::debug!(reason = %reason, "Rejected ID token");
            return AppError::InvalidToken.into_response();
        }
        Err(IdTokenError::Transient(reason)) => {
            tracing::error!(reason = %reason, "ID token verification unavailable");
            return AppError::Upstream(reason).into_response();
        }
    };

    request.extensions_mut().insert(AuthUser(identity));
    next.run(request).await
}
