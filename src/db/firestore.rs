// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed balance store.
//!
//! Provides typed operations for:
//! - Account records (`users/{user_id}`)
//! - Processed-order markers (`processed_orders/{order_id}`)
//!
//! Every read-modify-write runs inside `run_transaction`: reads register the
//! document for conflict detection and Firestore retries the closure with
//! fresh data on contention, so concurrent decrements and credits never lose
//! an update.

use crate::db::{
    collections, validate_balance, validate_increment, BalanceStore, BalanceWatchers,
    CreateAccountOutcome, CreditOutcome,
};
use crate::error::AppError;
use crate::models::{AccountRecord, LastPurchase, ProcessedOrder};
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use firestore::errors::{BackoffError, FirestoreError};
use std::time::Duration;
use tokio::sync::watch;

/// How often a watched account is re-read to pick up writes made by other
/// instances.
const BALANCE_POLL_INTERVAL: Duration = Duration::from_secs(3);

type TxResult<T> = std::result::Result<T, BackoffError<FirestoreError>>;

enum DecrementResult {
    Decremented(i64),
    Insufficient,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
    watchers: BalanceWatchers,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client,
            watchers: BalanceWatchers::new(),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client,
            watchers: BalanceWatchers::new(),
        })
    }

    /// Look up a processed-order marker.
    pub async fn get_processed_order(
        &self,
        order_id: &str,
    ) -> Result<Option<ProcessedOrder>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::PROCESSED_ORDERS)
            .obj()
            .one(&order_doc_id(order_id))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Re-read a watched account until nobody listens anymore.
    async fn poll_balance(self, user_id: String) {
        let mut interval = tokio::time::interval(BALANCE_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if !self.watchers.has_receivers(&user_id) {
                self.watchers.prune(&user_id);
                // A subscriber may have attached between the check and the prune.
                if !self.watchers.has_receivers(&user_id) {
                    tracing::debug!(user_id = %user_id, "Balance watch closed");
                    break;
                }
            }

            match self.read(&user_id).await {
                Ok(balance) => self.watchers.publish(&user_id, balance),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Balance poll failed");
                }
            }
        }
    }
}

/// Order references are user-controlled strings; encode them for use as ids.
fn order_doc_id(order_id: &str) -> String {
    urlencoding::encode(order_id).into_owned()
}

fn tx_error(context: &str, e: FirestoreError) -> AppError {
    AppError::Database(format!("{context}: {e}"))
}

#[async_trait]
impl BalanceStore for FirestoreDb {
    async fn read(&self, user_id: &str) -> Result<i64, AppError> {
        Ok(self
            .get_account(user_id)
            .await?
            .map(|account| account.credits)
            .unwrap_or(0))
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<AccountRecord>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn create_account(
        &self,
        user_id: &str,
        email: Option<&str>,
        credits: i64,
    ) -> Result<CreateAccountOutcome, AppError> {
        validate_balance(credits)?;

        let user_id_owned = user_id.to_string();
        let email = email.map(str::to_string);

        let outcome = self
            .client
            .run_transaction(|db, transaction| {
                let user_id = user_id_owned.clone();
                let email = email.clone();
                Box::pin(async move {
                    let existing: Option<AccountRecord> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::USERS)
                        .obj()
                        .one(&user_id)
                        .await?;

                    if let Some(existing) = existing {
                        return Ok::<_, BackoffError<FirestoreError>>(
                            CreateAccountOutcome::AlreadyExists(existing),
                        );
                    }

                    let record = AccountRecord::new(email, credits, now_rfc3339());
                    db.fluent()
                        .update()
                        .in_col(collections::USERS)
                        .document_id(&user_id)
                        .object(&record)
                        .add_to_transaction(transaction)?;

                    Ok(CreateAccountOutcome::Created(record))
                })
            })
            .await
            .map_err(|e| tx_error("Account creation transaction failed", e))?;

        match &outcome {
            CreateAccountOutcome::Created(record) => {
                tracing::info!(user_id, credits = record.credits, "Account created");
                self.watchers.publish(user_id, record.credits);
            }
            CreateAccountOutcome::AlreadyExists(_) => {
                tracing::debug!(user_id, "Account already exists");
            }
        }

        Ok(outcome)
    }

    async fn transactional_decrement(&self, user_id: &str) -> Result<i64, AppError> {
        let user_id_owned = user_id.to_string();

        let result = self
            .client
            .run_transaction(|db, transaction| {
                let user_id = user_id_owned.clone();
                Box::pin(async move {
                    let current: Option<AccountRecord> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::USERS)
                        .obj()
                        .one(&user_id)
                        .await?;

                    let mut account = match current {
                        Some(account) if account.credits > 0 => account,
                        _ => return TxResult::Ok(DecrementResult::Insufficient),
                    };

                    account.credits -= 1;
                    db.fluent()
                        .update()
                        .in_col(collections::USERS)
                        .document_id(&user_id)
                        .object(&account)
                        .add_to_transaction(transaction)?;

                    Ok(DecrementResult::Decremented(account.credits))
                })
            })
            .await
            .map_err(|e| tx_error("Decrement transaction failed", e))?;

        match result {
            DecrementResult::Decremented(new_balance) => {
                tracing::info!(user_id, new_balance, "Credit consumed");
                self.watchers.publish(user_id, new_balance);
                Ok(new_balance)
            }
            DecrementResult::Insufficient => {
                tracing::info!(user_id, "Decrement refused: insufficient credits");
                Err(AppError::InsufficientCredits)
            }
        }
    }

    async fn increment(&self, user_id: &str, amount: i64) -> Result<i64, AppError> {
        validate_increment(amount)?;

        let user_id_owned = user_id.to_string();

        let new_balance = self
            .client
            .run_transaction(|db, transaction| {
                let user_id = user_id_owned.clone();
                Box::pin(async move {
                    let current: Option<AccountRecord> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::USERS)
                        .obj()
                        .one(&user_id)
                        .await?;

                    let mut account =
                        current.unwrap_or_else(|| AccountRecord::new(None, 0, now_rfc3339()));
                    account.credits += amount;

                    db.fluent()
                        .update()
                        .in_col(collections::USERS)
                        .document_id(&user_id)
                        .object(&account)
                        .add_to_transaction(transaction)?;

                    TxResult::Ok(account.credits)
                })
            })
            .await
            .map_err(|e| tx_error("Increment transaction failed", e))?;

        tracing::info!(user_id, amount, new_balance, "Credits added");
        self.watchers.publish(user_id, new_balance);
        Ok(new_balance)
    }

    async fn credit_order(
        &self,
        user_id: &str,
        purchase: LastPurchase,
    ) -> Result<CreditOutcome, AppError> {
        validate_increment(purchase.credits)?;

        let user_id_owned = user_id.to_string();
        let doc_id = order_doc_id(&purchase.order_id);

        let outcome = self
            .client
            .run_transaction(|db, transaction| {
                let user_id = user_id_owned.clone();
                let doc_id = doc_id.clone();
                let purchase = purchase.clone();
                Box::pin(async move {
                    // 1. Dedup check (registers the marker for conflict detection)
                    let marker: Option<ProcessedOrder> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::PROCESSED_ORDERS)
                        .obj()
                        .one(&doc_id)
                        .await?;

                    if marker.is_some() {
                        return TxResult::Ok(CreditOutcome::AlreadyProcessed);
                    }

                    // 2. Read current account within the transaction
                    let current: Option<AccountRecord> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::USERS)
                        .obj()
                        .one(&user_id)
                        .await?;

                    let mut account =
                        current.unwrap_or_else(|| AccountRecord::new(None, 0, now_rfc3339()));
                    account.credits += purchase.credits;

                    let marker = ProcessedOrder {
                        order_id: purchase.order_id.clone(),
                        user_id: user_id.clone(),
                        package_id: purchase.package_id.clone(),
                        credits: purchase.credits,
                        gateway_status: purchase.gateway_status.clone(),
                        processed_at: now_rfc3339(),
                    };
                    account.last_purchase = Some(purchase);

                    // 3. Account and marker commit together
                    db.fluent()
                        .update()
                        .in_col(collections::USERS)
                        .document_id(&user_id)
                        .object(&account)
                        .add_to_transaction(transaction)?;

                    db.fluent()
                        .update()
                        .in_col(collections::PROCESSED_ORDERS)
                        .document_id(&doc_id)
                        .object(&marker)
                        .add_to_transaction(transaction)?;

                    Ok(CreditOutcome::Credited {
                        new_balance: account.credits,
                    })
                })
            })
            .await
            .map_err(|e| tx_error("Purchase credit transaction failed", e))?;

        match outcome {
            CreditOutcome::Credited { new_balance } => {
                tracing::info!(
                    user_id,
                    order_id = %purchase.order_id,
                    credits = purchase.credits,
                    new_balance,
                    "Purchase credited atomically"
                );
                self.watchers.publish(user_id, new_balance);
            }
            CreditOutcome::AlreadyProcessed => {
                tracing::info!(
                    user_id,
                    order_id = %purchase.order_id,
                    "Order already credited (idempotent skip)"
                );
            }
        }

        Ok(outcome)
    }

    async fn set(&self, user_id: &str, value: i64) -> Result<(), AppError> {
        validate_balance(value)?;

        let user_id_owned = user_id.to_string();

        self.client
            .run_transaction(|db, transaction| {
                let user_id = user_id_owned.clone();
                Box::pin(async move {
                    let current: Option<AccountRecord> = db
                        .fluent()
                        .select()
                        .by_id_in(collections::USERS)
                        .obj()
                        .one(&user_id)
                        .await?;

                    let mut account =
                        current.unwrap_or_else(|| AccountRecord::new(None, 0, now_rfc3339()));
                    account.credits = value;

                    db.fluent()
                        .update()
                        .in_col(collections::USERS)
                        .document_id(&user_id)
                        .object(&account)
                        .add_to_transaction(transaction)?;

                    TxResult::Ok(())
                })
            })
            .await
            .map_err(|e| tx_error("Set balance transaction failed", e))?;

        tracing::info!(user_id, value, "Balance overwritten");
        self.watchers.publish(user_id, value);
        Ok(())
    }

    fn watch(&self, user_id: &str) -> watch::Receiver<Option<i64>> {
        let (receiver, created) = self.watchers.subscribe(user_id);
        if created {
            // The first tick fires immediately and seeds the channel.
            tokio::spawn(self.clone().poll_balance(user_id.to_string()));
        }
        receiver
    }
}
