// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("An analysis is already running for this session")]
    AnalysisInProgress,

    #[error("No matches detected in the image")]
    NoMatchesDetected,

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Unexpected upstream response: {0}")]
    Parse(String),

    #[error("Account record could not be created: {0}")]
    RegistrationIncomplete(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Message safe to show to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Unauthorized | AppError::InvalidToken => {
                "Your session has expired. Please sign in again."
            }
            AppError::BadRequest(_) => "The request was not valid.",
            AppError::InsufficientCredits => {
                "You do not have enough credits to run an analysis."
            }
            AppError::AnalysisInProgress => "An analysis is already running.",
            AppError::NoMatchesDetected => {
                "No matches were detected in the image. Please try a clearer picture."
            }
            AppError::Upstream(_) | AppError::Parse(_) => {
                "The analysis service is unavailable right now. Please try again."
            }
            AppError::RegistrationIncomplete(_) => {
                "Your account could not be set up. Please try again."
            }
            AppError::Database(_) | AppError::Internal(_) => "Something went wrong.",
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidToken => "invalid_token",
            AppError::BadRequest(_) => "bad_request",
            AppError::InsufficientCredits => "insufficient_credits",
            AppError::AnalysisInProgress => "analysis_in_progress",
            AppError::NoMatchesDetected => "no_matches_detected",
            AppError::Upstream(_) | AppError::Parse(_) => "upstream_error",
            AppError::RegistrationIncomplete(_) => "registration_incomplete",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized | AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            AppError::AnalysisInProgress => StatusCode::CONFLICT,
            AppError::NoMatchesDetected => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream(_) | AppError::Parse(_) => StatusCode::BAD_GATEWAY,
            AppError::RegistrationIncomplete(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let details = match &self {
            AppError::BadRequest(msg) => Some(msg.clone()),
            AppError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Upstream error");
                None
            }
            AppError::Parse(msg) => {
                tracing::warn!(error = %msg, "Upstream parse error");
                None
            }
            AppError::RegistrationIncomplete(msg) => {
                tracing::error!(error = %msg, "Registration incomplete");
                None
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                None
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                None
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.user_message(),
            details,
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
