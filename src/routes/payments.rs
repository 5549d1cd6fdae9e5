// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Public payment routes: package catalog and gateway callback.
//!
//! The callback endpoint answers 200 for everything it has authenticated,
//! including orders it refuses, so the gateway stops retrying. Only
//! authentication failures get an error status.

use crate::models::{Package, PACKAGES};
use crate::services::callback::CallbackOutcome;
use crate::services::gateway::{CallbackAuthError, SIGNATURE_HEADER};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

/// Payment routes (public; the callback authenticates by signature).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/packages", get(list_packages))
        .route("/api/payments/callback", post(payment_callback))
}

/// Package catalog.
async fn list_packages() -> Json<&'static [Package]> {
    Json(PACKAGES.as_slice())
}

/// Gateway callback (form-encoded, signed).
async fn payment_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let payload = match state.callbacks.authenticate(signature, &body) {
        Ok(payload) => payload,
        Err(e @ (CallbackAuthError::MissingSignature | CallbackAuthError::EmptyBody)) => {
            tracing::warn!(error = %e, "Malformed payment callback");
            return (StatusCode::BAD_REQUEST, "Bad request");
        }
        Err(e @ CallbackAuthError::InvalidSignature) => {
            tracing::warn!(error = %e, "Payment callback failed signature check");
            return (StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    };

    match state.callbacks.process(payload).await {
        Ok(CallbackOutcome::Credited { .. }) => (StatusCode::OK, "OK"),
        Ok(CallbackOutcome::Duplicate { .. }) => (StatusCode::OK, "Already processed"),
        Ok(CallbackOutcome::Ignored { .. }) => (StatusCode::OK, "Payment not completed"),
        Ok(CallbackOutcome::Rejected { .. }) => (StatusCode::OK, "Invalid order"),
        Err(e) => {
            // Acknowledge anyway; the error is logged for manual follow-up.
            tracing::error!(error = %e, "Payment callback processing failed");
            (StatusCode::OK, "Error logged")
        }
    }
}
