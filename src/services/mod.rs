// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod analysis;
pub mod callback;
pub mod football;
pub mod gateway;
pub mod gemini;
pub mod identity;
pub mod purchase;
pub mod session;

pub use analysis::{AnalysisOutcome, AnalysisService, MatchExtractor, Predictor, SlipImage, StatsProvider};
pub use callback::{CallbackOutcome, CallbackProcessor};
pub use football::MockFootballApi;
pub use gateway::{PaymentGateway, ShopierGateway};
pub use gemini::GeminiClient;
pub use identity::{IdTokenError, IdTokenVerifier, VerifiedIdentity};
pub use purchase::{PaymentStart, PurchaseService};
pub use session::{Session, SessionManager};
