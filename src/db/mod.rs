//! Balance store layer (Firestore, with an in-memory backend for local runs).

pub mod firestore;
pub mod memory;
pub mod watch;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;
pub use watch::BalanceWatchers;

use crate::error::AppError;
use crate::models::{AccountRecord, LastPurchase};
use async_trait::async_trait;
use tokio::sync::watch as watch_channel;

/// Collection names as constants.
pub mod collections {
    /// Account records (keyed by user id)
    pub const USERS: &str = "users";
    /// Credited orders (keyed by url-encoded order reference)
    pub const PROCESSED_ORDERS: &str = "processed_orders";
}

/// Result of a create-if-absent account write.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateAccountOutcome {
    Created(AccountRecord),
    AlreadyExists(AccountRecord),
}

/// Result of crediting a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited { new_balance: i64 },
    /// The order was credited before; nothing changed.
    AlreadyProcessed,
}

/// Durable source of truth for account balances.
///
/// Every mutation is atomic per user and is published to `watch` receivers
/// for that user.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current balance; an absent record reads as zero.
    async fn read(&self, user_id: &str) -> Result<i64, AppError>;

    async fn get_account(&self, user_id: &str) -> Result<Option<AccountRecord>, AppError>;

    /// Create the account record unless one already exists.
    async fn create_account(
        &self,
        user_id: &str,
        email: Option<&str>,
        credits: i64,
    ) -> Result<CreateAccountOutcome, AppError>;

    /// Subtract one credit. Fails with `InsufficientCredits` and leaves the
    /// record untouched when the balance is zero or the record is absent.
    async fn transactional_decrement(&self, user_id: &str) -> Result<i64, AppError>;

    /// Add `amount` (> 0) credits and return the new balance.
    async fn increment(&self, user_id: &str, amount: i64) -> Result<i64, AppError>;

    /// Credit a purchase exactly once per order id, recording the audit
    /// entry and the dedup marker in the same atomic write.
    async fn credit_order(
        &self,
        user_id: &str,
        purchase: LastPurchase,
    ) -> Result<CreditOutcome, AppError>;

    /// Overwrite the balance (administrative correction).
    async fn set(&self, user_id: &str, value: i64) -> Result<(), AppError>;

    /// Live view of a user's balance. `None` until the first value is known.
    fn watch(&self, user_id: &str) -> watch_channel::Receiver<Option<i64>>;
}

pub(crate) fn validate_increment(amount: i64) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::BadRequest(format!(
            "increment amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_balance(value: i64) -> Result<(), AppError> {
    if value < 0 {
        return Err(AppError::BadRequest(format!(
            "balance must not be negative, got {value}"
        )));
    }
    Ok(())
}
