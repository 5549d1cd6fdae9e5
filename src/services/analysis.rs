// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bet-slip analysis pipeline.
//!
//! Extraction, enrichment and prediction run in order, each bounded by the
//! configured stage timeout. One credit is charged only after predictions
//! exist.

use crate::error::AppError;
use crate::models::{Match, MatchPrediction, RunState};
use crate::services::session::Session;
use anyhow::anyhow;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Uploaded bet-slip image.
#[derive(Debug, Clone)]
pub struct SlipImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Reads match pairings (`"Home vs Away"`) off a slip image.
#[async_trait]
pub trait MatchExtractor: Send + Sync {
    async fn extract_matches(&self, image: &SlipImage) -> Result<Vec<String>, AppError>;
}

/// Looks up statistics for named pairings.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn find_matches(&self, names: &[String]) -> Result<Vec<Match>, AppError>;
}

/// Produces one prediction per enriched match.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, matches: &[Match]) -> Result<Vec<MatchPrediction>, AppError>;
}

/// Result of a charged analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub predictions: Vec<MatchPrediction>,
    /// Store balance right after the charge
    pub balance: i64,
}

/// Orchestrates one analysis run per request.
#[derive(Clone)]
pub struct AnalysisService {
    extractor: Arc<dyn MatchExtractor>,
    stats: Arc<dyn StatsProvider>,
    predictor: Arc<dyn Predictor>,
    stage_timeout: Duration,
}

impl AnalysisService {
    pub fn new(
        extractor: Arc<dyn MatchExtractor>,
        stats: Arc<dyn StatsProvider>,
        predictor: Arc<dyn Predictor>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            stats,
            predictor,
            stage_timeout,
        }
    }

    /// Analyze a slip for the session's user and charge one credit.
    ///
    /// The pipeline runs on its own task, so dropping this future (client
    /// disconnect) does not abort a run that is about to charge.
    pub async fn analyze(
        &self,
        session: Arc<Session>,
        image: SlipImage,
    ) -> Result<AnalysisOutcome, AppError> {
        if image.data.is_empty() {
            return Err(AppError::BadRequest("image is empty".to_string()));
        }

        let balance = session.refresh_balance().await?;
        if balance <= 0 {
            tracing::info!(user_id = %session.user_id(), "Analysis refused: no credits");
            return Err(AppError::InsufficientCredits);
        }

        let guard = session.begin_run()?;
        let service = self.clone();

        let handle = tokio::spawn(async move {
            let result = service.run_pipeline(&session, image).await;
            let state = match &result {
                Ok(outcome) => RunState::Succeeded {
                    predictions: outcome.predictions.clone(),
                    balance: outcome.balance,
                },
                Err(e) => RunState::Failed {
                    error: e.code().to_string(),
                    message: e.user_message().to_string(),
                },
            };
            if !guard.finish(state) {
                tracing::info!(
                    user_id = %session.user_id(),
                    "Analysis finished after reset; result not recorded"
                );
            }
            result
        });

        handle
            .await
            .map_err(|e| AppError::Internal(anyhow!("analysis task failed: {e}")))?
    }

    async fn run_pipeline(
        &self,
        session: &Session,
        image: SlipImage,
    ) -> Result<AnalysisOutcome, AppError> {
        let user_id = session.user_id();

        let names = self
            .stage("extraction", self.extractor.extract_matches(&image))
            .await?;
        if names.is_empty() {
            tracing::info!(user_id, "No matches detected in slip");
            return Err(AppError::NoMatchesDetected);
        }
        tracing::debug!(user_id, matches = names.len(), "Matches extracted");

        let matches = self
            .stage("enrichment", self.stats.find_matches(&names))
            .await?;
        if matches.is_empty() {
            return Err(AppError::NoMatchesDetected);
        }

        let predictions = self
            .stage("prediction", self.predictor.predict(&matches))
            .await?;

        let balance = session.decrement_balance().await?;

        tracing::info!(
            user_id,
            predictions = predictions.len(),
            credits = balance,
            "Analysis charged"
        );

        Ok(AnalysisOutcome {
            predictions,
            balance,
        })
    }

    async fn stage<T>(
        &self,
        name: &'static str,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    stage = name,
                    timeout_secs = self.stage_timeout.as_secs(),
                    "Analysis stage timed out"
                );
                Err(AppError::Upstream(format!("{name} stage timed out")))
            }
        }
    }
}
