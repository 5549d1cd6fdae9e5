// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod admin;
pub mod api;
pub mod payments;

use crate::config::is_local_http_origin;
use crate::middleware::{require_admin, require_auth, security};
use crate::AppState;
use axum::http::{header, HeaderValue, Method};
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HealthResponse {
    pub status: String,
    pub build_id: String,
    pub payment_test_mode: bool,
}

/// Health check response
async fn health_check(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<HealthResponse> {
    let build_id = option_env!("BUILD_ID").unwrap_or("unknown").to_string();
    Json(HealthResponse {
        status: "ok".to_string(),
        build_id,
        payment_test_mode: state.config.payment_test_mode,
    })
}

/// Origins allowed to call the API with credentials.
///
/// The frontend must match exactly; loopback dev servers only when enabled.
fn origin_allowed(frontend_url: &str, allow_dev_origins: bool, origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    origin == frontend_url.trim_end_matches('/')
        || (allow_dev_origins && is_local_http_origin(origin))
}

fn cors_layer(frontend_url: String, allow_dev_origins: bool) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _parts| {
            origin_allowed(&frontend_url, allow_dev_origins, origin)
        }))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Signature-checked callback and catalog; no ID token
    let public = Router::new()
        .route("/health", get(health_check))
        .merge(payments::routes());

    let user = api::routes().route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin =
        admin::routes().route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public)
        .merge(user)
        .merge(admin)
        .layer(middleware::from_fn(security::add_security_headers))
        .layer(cors_layer(
            state.config.frontend_url.clone(),
            state.config.allow_dev_origins,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRONTEND: &str = "https://betslip.example";

    fn allowed(allow_dev_origins: bool, origin: &'static str) -> bool {
        origin_allowed(FRONTEND, allow_dev_origins, &HeaderValue::from_static(origin))
    }

    #[test]
    fn dev_and_frontend_origins_are_allowed() {
        for origin in [
            "https://betslip.example",
            "http://localhost:5173",
            "http://127.0.0.1:8080",
        ] {
            assert!(allowed(true, origin), "{origin} should be allowed");
        }
        assert!(!allowed(true, "https://betslip.example.evil"));
        assert!(!allowed(true, "https://localhost"));
    }

    #[test]
    fn lookalike_loopback_origins_are_rejected() {
        for origin in [
            "http://localhost.evil.example",
            "http://127.0.0.1.evil.example",
            "http://localhost.attacker.example:5173",
        ] {
            assert!(!allowed(true, origin), "{origin} should be rejected");
        }
    }

    #[test]
    fn dev_origins_need_opt_in() {
        assert!(allowed(false, "https://betslip.example"));
        assert!(!allowed(false, "http://localhost:5173"));
    }
}
