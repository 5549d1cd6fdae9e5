// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Order references correlating a purchase with its gateway callback.
//!
//! Format: `{user_id}-{package_id}-{timestamp_ms}`. The reference carries
//! everything the callback needs to attribute credits, so nothing is stored
//! between purchase initiation and callback.

use crate::models::Package;
use std::fmt;

const DELIMITER: char = '-';

/// A parsed order reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReference {
    pub user_id: String,
    pub package_id: String,
    pub timestamp_ms: i64,
}

/// Why an order reference could not be built or parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderReferenceError {
    #[error("user id is empty or contains '-'")]
    InvalidUserId,

    #[error("package id is empty or contains '-'")]
    InvalidPackageId,

    #[error("malformed order reference: {0}")]
    Malformed(String),
}

impl OrderReference {
    /// Build a reference for a new purchase.
    pub fn new(
        user_id: &str,
        package_id: &str,
        timestamp_ms: i64,
    ) -> Result<Self, OrderReferenceError> {
        if user_id.is_empty() || user_id.contains(DELIMITER) {
            return Err(OrderReferenceError::InvalidUserId);
        }
        if package_id.is_empty() || package_id.contains(DELIMITER) {
            return Err(OrderReferenceError::InvalidPackageId);
        }
        Ok(Self {
            user_id: user_id.to_string(),
            package_id: package_id.to_string(),
            timestamp_ms,
        })
    }

    /// Parse a reference received from the gateway.
    pub fn parse(raw: &str) -> Result<Self, OrderReferenceError> {
        let malformed = || OrderReferenceError::Malformed(raw.to_string());

        let parts: Vec<&str> = raw.trim().split(DELIMITER).collect();
        let [user_id, package_id, timestamp] = parts.as_slice() else {
            return Err(malformed());
        };

        if user_id.is_empty() || package_id.is_empty() {
            return Err(malformed());
        }
        let timestamp_ms = timestamp.parse::<i64>().map_err(|_| malformed())?;

        Ok(Self {
            user_id: (*user_id).to_string(),
            package_id: (*package_id).to_string(),
            timestamp_ms,
        })
    }

    /// The catalog package this order is for, if it exists.
    pub fn package(&self) -> Option<&'static Package> {
        Package::find(&self.package_id)
    }
}

impl fmt::Display for OrderReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}",
            self.user_id, self.package_id, self.timestamp_ms
        )
    }
}
