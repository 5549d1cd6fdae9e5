// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process balance store for local development and tests.
//!
//! A single mutex guards all accounts, so every read-modify-write is atomic.

use crate::db::{
    validate_balance, validate_increment, BalanceStore, BalanceWatchers, CreateAccountOutcome,
    CreditOutcome,
};
use crate::error::AppError;
use crate::models::{AccountRecord, LastPurchase, ProcessedOrder};
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, AccountRecord>,
    processed_orders: HashMap<String, ProcessedOrder>,
}

/// In-memory balance store.
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<Mutex<Tables>>,
    watchers: BalanceWatchers,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Database("memory store lock poisoned".to_string()))
    }

    /// Whether anyone holds a live watch on this user's balance.
    pub fn is_watched(&self, user_id: &str) -> bool {
        self.watchers.has_receivers(user_id)
    }

    /// Look up a processed-order marker.
    pub fn processed_order(&self, order_id: &str) -> Option<ProcessedOrder> {
        self.lock()
            .ok()
            .and_then(|tables| tables.processed_orders.get(order_id).cloned())
    }
}

#[async_trait]
impl BalanceStore for MemoryDb {
    async fn read(&self, user_id: &str) -> Result<i64, AppError> {
        let credits = self
            .lock()?
            .accounts
            .get(user_id)
            .map(|a| a.credits)
            .unwrap_or(0);
        Ok(credits)
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<AccountRecord>, AppError> {
        Ok(self.lock()?.accounts.get(user_id).cloned())
    }

    async fn create_account(
        &self,
        user_id: &str,
        email: Option<&str>,
        credits: i64,
    ) -> Result<CreateAccountOutcome, AppError> {
        validate_balance(credits)?;

        let outcome = {
            let mut tables = self.lock()?;
            if let Some(existing) = tables.accounts.get(user_id) {
                return Ok(CreateAccountOutcome::AlreadyExists(existing.clone()));
            }
            let record = AccountRecord::new(email.map(str::to_string), credits, now_rfc3339());
            tables.accounts.insert(user_id.to_string(), record.clone());
            CreateAccountOutcome::Created(record)
        };

        self.watchers.publish(user_id, credits);
        Ok(outcome)
    }

    async fn transactional_decrement(&self, user_id: &str) -> Result<i64, AppError> {
        let new_balance = {
            let mut tables = self.lock()?;
            let account = tables
                .accounts
                .get_mut(user_id)
                .ok_or(AppError::InsufficientCredits)?;
            if account.credits <= 0 {
                return Err(AppError::InsufficientCredits);
            }
            account.credits -= 1;
            account.credits
        };

        self.watchers.publish(user_id, new_balance);
        Ok(new_balance)
    }

    async fn increment(&self, user_id: &str, amount: i64) -> Result<i64, AppError> {
        validate_increment(amount)?;

        let new_balance = {
            let mut tables = self.lock()?;
            let account = tables
                .accounts
                .entry(user_id.to_string())
                .or_insert_with(|| AccountRecord::new(None, 0, now_rfc3339()));
            account.credits += amount;
            account.credits
        };

        self.watchers.publish(user_id, new_balance);
        Ok(new_balance)
    }

    async fn credit_order(
        &self,
        user_id: &str,
        purchase: LastPurchase,
    ) -> Result<CreditOutcome, AppError> {
        validate_increment(purchase.credits)?;

        let new_balance = {
            let mut tables = self.lock()?;
            if tables.processed_orders.contains_key(&purchase.order_id) {
                return Ok(CreditOutcome::AlreadyProcessed);
            }

            let marker = ProcessedOrder {
                order_id: purchase.order_id.clone(),
                user_id: user_id.to_string(),
                package_id: purchase.package_id.clone(),
                credits: purchase.credits,
                gateway_status: purchase.gateway_status.clone(),
                processed_at: now_rfc3339(),
            };

            let account = tables
                .accounts
                .entry(user_id.to_string())
                .or_insert_with(|| AccountRecord::new(None, 0, now_rfc3339()));
            account.credits += purchase.credits;
            account.last_purchase = Some(purchase);
            let new_balance = account.credits;

            tables
                .processed_orders
                .insert(marker.order_id.clone(), marker);
            new_balance
        };

        self.watchers.publish(user_id, new_balance);
        Ok(CreditOutcome::Credited { new_balance })
    }

    async fn set(&self, user_id: &str, value: i64) -> Result<(), AppError> {
        validate_balance(value)?;

        {
            let mut tables = self.lock()?;
            tables
                .accounts
                .entry(user_id.to_string())
                .or_insert_with(|| AccountRecord::new(None, 0, now_rfc3339()))
                .credits = value;
        }

        self.watchers.publish(user_id, value);
        Ok(())
    }

    fn watch(&self, user_id: &str) -> watch::Receiver<Option<i64>> {
        let (receiver, created) = self.watchers.subscribe(user_id);
        if created {
            if let Ok(tables) = self.lock() {
                let credits = tables.accounts.get(user_id).map(|a| a.credits).unwrap_or(0);
                drop(tables);
                self.watchers.publish(user_id, credits);
            }
        }
        receiver
    }
}
