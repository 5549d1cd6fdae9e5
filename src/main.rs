// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Betslip Analyzer API Server
//!
//! Reads matches off betting-slip photos, predicts outcomes with a
//! generative model and sells analysis credits through a payment gateway.

use betslip_analyzer::{
    config::{Config, StoreBackend, SESSION_IDLE_TIMEOUT, SESSION_SWEEP_INTERVAL},
    db::{BalanceStore, FirestoreDb, MemoryDb},
    services::{AnalysisService, GeminiClient, IdTokenVerifier, MockFootballApi, ShopierGateway},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Betslip Analyzer API");

    // Initialize balance store
    let store: Arc<dyn BalanceStore> = match config.store_backend {
        StoreBackend::Firestore => Arc::new(FirestoreDb::new(&config.firebase_project_id).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory balance store; balances are lost on restart");
            Arc::new(MemoryDb::new())
        }
    };

    let verifier = Arc::new(IdTokenVerifier::new(&config)?);

    // Analysis pipeline collaborators
    let gemini = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_extraction_model.clone(),
        config.gemini_prediction_model.clone(),
        config.stage_timeout,
    )?);
    let analysis = AnalysisService::new(
        gemini.clone(),
        Arc::new(MockFootballApi::default()),
        gemini,
        config.stage_timeout,
    );
    tracing::info!(
        extraction_model = %config.gemini_extraction_model,
        prediction_model = %config.gemini_prediction_model,
        stage_timeout_secs = config.stage_timeout.as_secs(),
        "Analysis pipeline initialized"
    );

    let gateway = Arc::new(ShopierGateway::new(
        config.shopier_api_key.clone(),
        config.shopier_api_secret.clone(),
        config.payment_callback_secret.clone(),
    )?);

    // Build shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        verifier,
        analysis,
        gateway,
    ));

    // Reclaim sessions nobody uses anymore
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        sweeper_state
            .sessions
            .sweep_idle(SESSION_SWEEP_INTERVAL, SESSION_IDLE_TIMEOUT)
            .await;
    });

    // Build router
    let app = betslip_analyzer::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("betslip_analyzer=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
