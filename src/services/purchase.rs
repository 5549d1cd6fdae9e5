// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credit purchase initiation.

use crate::db::{BalanceStore, CreditOutcome};
use crate::error::AppError;
use crate::models::{LastPurchase, OrderReference, OrderReferenceError, Package};
use crate::services::gateway::{PaymentGateway, PaymentRedirect, PaymentRequest};
use crate::services::identity::VerifiedIdentity;
use crate::time_utils::now_millis;
use serde::Serialize;
use std::sync::Arc;

/// Gateway status recorded for purchases credited in test mode.
const TEST_MODE_STATUS: &str = "test";

/// What the client should do to complete a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PaymentStart {
    #[serde(rename_all = "camelCase")]
    Redirect { payment_url: String },
    #[serde(rename_all = "camelCase")]
    Form {
        payment_html: String,
        order_id: String,
    },
    /// Credits were added immediately; no payment happened.
    #[serde(rename_all = "camelCase")]
    TestMode { payment_url: String, test_mode: bool },
}

/// Starts purchases for authenticated users.
pub struct PurchaseService {
    store: Arc<dyn BalanceStore>,
    gateway: Arc<dyn PaymentGateway>,
    frontend_url: String,
    api_url: String,
    test_mode: bool,
}

impl PurchaseService {
    pub fn new(
        store: Arc<dyn BalanceStore>,
        gateway: Arc<dyn PaymentGateway>,
        frontend_url: &str,
        api_url: &str,
        test_mode: bool,
    ) -> Self {
        if test_mode {
            tracing::warn!("Payment test mode enabled: purchases are credited without payment");
        }
        Self {
            store,
            gateway,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            test_mode,
        }
    }

    /// Begin buying `package_id` for the verified user.
    pub async fn start(
        &self,
        buyer: &VerifiedIdentity,
        package_id: &str,
    ) -> Result<PaymentStart, AppError> {
        let package = Package::find(package_id)
            .ok_or_else(|| AppError::BadRequest(format!("unknown package '{package_id}'")))?;

        let order = OrderReference::new(&buyer.user_id, package.id, now_millis()).map_err(
            |e| match e {
                OrderReferenceError::InvalidUserId => {
                    AppError::BadRequest("account id cannot be used for purchases".to_string())
                }
                other => AppError::BadRequest(other.to_string()),
            },
        )?;
        let order_id = order.to_string();

        tracing::info!(
            user_id = %buyer.user_id,
            order_id = %order_id,
            package_id = package.id,
            test_mode = self.test_mode,
            "Purchase started"
        );

        if self.test_mode {
            return self.credit_test_purchase(&order, package).await;
        }

        let request = PaymentRequest {
            order_id: order_id.clone(),
            package,
            buyer_name: buyer_name(buyer),
            buyer_email: buyer.email.clone(),
            callback_url: format!("{}/api/payments/callback", self.api_url),
            back_url: format!("{}/purchase-success", self.frontend_url),
        };

        match self.gateway.initiate(&request).await? {
            PaymentRedirect::Url(payment_url) => Ok(PaymentStart::Redirect { payment_url }),
            PaymentRedirect::Html { html, order_id } => Ok(PaymentStart::Form {
                payment_html: html,
                order_id,
            }),
        }
    }

    async fn credit_test_purchase(
        &self,
        order: &OrderReference,
        package: &'static Package,
    ) -> Result<PaymentStart, AppError> {
        let purchase = LastPurchase {
            order_id: order.to_string(),
            package_id: package.id.to_string(),
            credits: package.credits,
            timestamp: order.timestamp_ms,
            gateway_status: TEST_MODE_STATUS.to_string(),
            test_mode: true,
        };

        if let CreditOutcome::Credited { new_balance } =
            self.store.credit_order(&order.user_id, purchase).await?
        {
            tracing::info!(
                user_id = %order.user_id,
                credits = package.credits,
                new_balance,
                "Test purchase credited"
            );
        }

        Ok(PaymentStart::TestMode {
            payment_url: format!(
                "{}/purchase-success?test=true&credits={}",
                self.frontend_url, package.credits
            ),
            test_mode: true,
        })
    }
}

fn buyer_name(buyer: &VerifiedIdentity) -> String {
    buyer
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("Customer")
        .to_string()
}
