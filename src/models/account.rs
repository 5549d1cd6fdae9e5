//! Account record model for storage and API.

use serde::{Deserialize, Serialize};

/// Per-user balance record stored in Firestore.
///
/// Stored at: `users/{user_id}`. Field names are camelCase to stay
/// compatible with documents written by the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Email from the identity provider at registration time
    #[serde(default)]
    pub email: Option<String>,
    /// Current credit balance (never negative)
    #[serde(default)]
    pub credits: i64,
    /// When the account was created (RFC3339)
    #[serde(default)]
    pub created_at: String,
    /// Audit entry for the most recent credited purchase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_purchase: Option<LastPurchase>,
}

impl AccountRecord {
    /// New account with the given starting balance.
    pub fn new(email: Option<String>, credits: i64, created_at: String) -> Self {
        Self {
            email,
            credits,
            created_at,
            last_purchase: None,
        }
    }
}

/// Audit trail written alongside a purchase credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPurchase {
    pub order_id: String,
    pub package_id: String,
    /// Credits added by this purchase
    pub credits: i64,
    /// Epoch milliseconds when the credit was applied
    pub timestamp: i64,
    /// Raw status reported by the gateway
    pub gateway_status: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub test_mode: bool,
}

/// Dedup marker for a credited order.
///
/// Stored at: `processed_orders/{order_id}`, written in the same
/// transaction as the credit it records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedOrder {
    pub order_id: String,
    pub user_id: String,
    pub package_id: String,
    pub credits: i64,
    pub gateway_status: String,
    pub processed_at: String,
}
