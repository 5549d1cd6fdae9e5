// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod account;
pub mod analysis;
pub mod order;
pub mod package;

pub use account::{AccountRecord, LastPurchase, ProcessedOrder};
pub use analysis::{HeadToHead, HeadToHeadRecord, Match, MatchPrediction, RunState, Stats, Team};
pub use order::{OrderReference, OrderReferenceError};
pub use package::{Package, PACKAGES};
