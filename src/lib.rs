// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Betslip Analyzer: AI predictions for photographed betting slips
//!
//! This crate provides the backend API: credit balances, signed-in
//! sessions with a live balance feed, the extraction/prediction pipeline,
//! and the credit purchase flow with its payment gateway callback.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::BalanceStore;
use services::{
    AnalysisService, CallbackProcessor, IdTokenVerifier, PaymentGateway, PurchaseService,
    SessionManager,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BalanceStore>,
    pub verifier: Arc<IdTokenVerifier>,
    pub sessions: SessionManager,
    pub analysis: AnalysisService,
    pub purchases: PurchaseService,
    pub callbacks: CallbackProcessor,
}

impl AppState {
    /// Wire the services around one balance store and gateway.
    pub fn new(
        config: Config,
        store: Arc<dyn BalanceStore>,
        verifier: Arc<IdTokenVerifier>,
        analysis: AnalysisService,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let sessions = SessionManager::new(store.clone());
        let purchases = PurchaseService::new(
            store.clone(),
            gateway.clone(),
            &config.frontend_url,
            &config.api_url,
            config.payment_test_mode,
        );
        let callbacks = CallbackProcessor::new(store.clone(), gateway);

        Self {
            config,
            store,
            verifier,
            sessions,
            analysis,
            purchases,
            callbacks,
        }
    }
}
