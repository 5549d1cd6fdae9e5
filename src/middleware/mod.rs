// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (authentication, security, etc.).

pub mod admin_auth;
pub mod auth;
pub mod security;

pub use admin_auth::require_admin;
pub use auth::require_auth;
