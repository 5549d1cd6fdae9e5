// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Gateway callback processing.
//!
//! Every order reference ends in exactly one of:
//! - `Credited` (first successful callback)
//! - `Duplicate` (replay of a credited order, no second credit)
//! - `Ignored` (payment not completed)
//! - `Rejected` (reference cannot be attributed)

use crate::db::{BalanceStore, CreditOutcome};
use crate::error::AppError;
use crate::models::{LastPurchase, OrderReference};
use crate::services::gateway::{CallbackAuthError, CallbackPayload, PaymentGateway};
use crate::time_utils::now_millis;
use std::sync::Arc;

/// Terminal result of one callback delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Credited {
        order_id: String,
        user_id: String,
        credits: i64,
        new_balance: i64,
    },
    Duplicate {
        order_id: String,
    },
    Ignored {
        status: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

/// Applies authenticated gateway callbacks to the balance store.
pub struct CallbackProcessor {
    store: Arc<dyn BalanceStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CallbackProcessor {
    pub fn new(store: Arc<dyn BalanceStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Authenticate the raw callback. Nothing is mutated on failure.
    pub fn authenticate(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<CallbackPayload, CallbackAuthError> {
        self.gateway.verify_and_parse_callback(signature, body)
    }

    /// Apply an authenticated callback.
    pub async fn process(&self, payload: CallbackPayload) -> Result<CallbackOutcome, AppError> {
        if !payload.is_success() {
            tracing::info!(
                status = ?payload.status,
                order_id = ?payload.order_id,
                "Payment not completed; callback ignored"
            );
            return Ok(CallbackOutcome::Ignored {
                status: payload.status,
            });
        }

        let Some(order_id) = payload.order_id.as_deref() else {
            return Ok(reject("missing order reference"));
        };

        let order = match OrderReference::parse(order_id) {
            Ok(order) => order,
            Err(e) => return Ok(reject(&e.to_string())),
        };

        let Some(package) = order.package() else {
            return Ok(reject(&format!("unknown package '{}'", order.package_id)));
        };

        // Dedup on the canonical form so formatting variants of one order
        // share a marker
        let order_id = order.to_string();

        if let Some(buyer_id) = payload.buyer_id.as_deref() {
            if buyer_id != order.user_id {
                tracing::warn!(
                    order_id = %order_id,
                    buyer_id,
                    order_user_id = %order.user_id,
                    "Gateway buyer id differs from order user id"
                );
            }
        }

        let purchase = LastPurchase {
            order_id: order_id.clone(),
            package_id: package.id.to_string(),
            credits: package.credits,
            timestamp: now_millis(),
            gateway_status: payload.status.clone().unwrap_or_default(),
            test_mode: false,
        };

        match self.store.credit_order(&order.user_id, purchase).await? {
            CreditOutcome::Credited { new_balance } => {
                tracing::info!(
                    user_id = %order.user_id,
                    order_id = %order_id,
                    package_id = package.id,
                    credits = package.credits,
                    new_balance,
                    "Purchase credited"
                );
                Ok(CallbackOutcome::Credited {
                    order_id,
                    user_id: order.user_id,
                    credits: package.credits,
                    new_balance,
                })
            }
            CreditOutcome::AlreadyProcessed => {
                tracing::info!(order_id = %order_id, "Duplicate callback; already credited");
                Ok(CallbackOutcome::Duplicate { order_id })
            }
        }
    }
}

fn reject(reason: &str) -> CallbackOutcome {
    tracing::warn!(reason, "Callback rejected");
    CallbackOutcome::Rejected {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use crate::services::gateway::{sign_body, ShopierGateway};

    const SECRET: &[u8] = b"callback-secret";

    fn processor() -> (Arc<MemoryDb>, CallbackProcessor) {
        let store = Arc::new(MemoryDb::new());
        let gateway = Arc::new(
            ShopierGateway::new("key".into(), "secret".into(), SECRET.to_vec()).unwrap(),
        );
        (store.clone(), CallbackProcessor::new(store, gateway))
    }

    fn success(order_id: &str) -> CallbackPayload {
        CallbackPayload {
            status: Some("1".to_string()),
            order_id: Some(order_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn credits_package_and_records_last_purchase() {
        let (store, processor) = processor();
        store.create_account("ab12cd34", None, 3).await.unwrap();

        let outcome = processor
            .process(success("ab12cd34-p_standard-1700000000000"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Credited {
                order_id: "ab12cd34-p_standard-1700000000000".to_string(),
                user_id: "ab12cd34".to_string(),
                credits: 25,
                new_balance: 28,
            }
        );

        let account = store.get_account("ab12cd34").await.unwrap().unwrap();
        let last = account.last_purchase.unwrap();
        assert_eq!(last.package_id, "p_standard");
        assert_eq!(last.credits, 25);
        assert_eq!(last.gateway_status, "1");
    }

    #[tokio::test]
    async fn replay_is_duplicate() {
        let (store, processor) = processor();
        let order = "u1-p_trial-1700000000000";

        processor.process(success(order)).await.unwrap();
        let replay = processor.process(success(order)).await.unwrap();
        assert!(matches!(replay, CallbackOutcome::Duplicate { .. }));
        assert_eq!(store.read("u1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn formatting_variants_share_one_credit() {
        let (store, processor) = processor();

        let first = processor
            .process(success(" u1-p_standard-1700000000000 "))
            .await
            .unwrap();
        assert!(matches!(
            first,
            CallbackOutcome::Credited { ref order_id, .. } if order_id == "u1-p_standard-1700000000000"
        ));

        for variant in ["u1-p_standard-1700000000000", "u1-p_standard-+1700000000000"] {
            let replay = processor.process(success(variant)).await.unwrap();
            assert!(
                matches!(replay, CallbackOutcome::Duplicate { .. }),
                "{variant} should be a duplicate"
            );
        }
        assert_eq!(store.read("u1").await.unwrap(), 25);
        assert!(store.processed_order("u1-p_standard-1700000000000").is_some());
    }

    #[tokio::test]
    async fn mismatched_buyer_id_credits_order_owner() {
        let (store, processor) = processor();

        let outcome = processor
            .process(CallbackPayload {
                buyer_id: Some("someone-else".to_string()),
                ..success("u1-p_trial-1700000000000")
            })
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Credited { ref user_id, .. } if user_id == "u1"));
        assert_eq!(store.read("u1").await.unwrap(), 5);
        assert_eq!(store.read("someone-else").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_payment_is_ignored() {
        let (store, processor) = processor();
        let outcome = processor
            .process(CallbackPayload {
                status: Some("0".to_string()),
                order_id: Some("u1-p_pro-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Ignored { .. }));
        assert_eq!(store.read("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unattributable_orders_are_rejected() {
        let (store, processor) = processor();
        for order in ["garbage", "u1-p_pro", "u1-p_gold-1700000000000", "a-b-c-d"] {
            let outcome = processor.process(success(order)).await.unwrap();
            assert!(
                matches!(outcome, CallbackOutcome::Rejected { .. }),
                "{order} should be rejected"
            );
        }
        let missing = processor
            .process(CallbackPayload {
                status: Some("success".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(missing, CallbackOutcome::Rejected { .. }));
        assert_eq!(store.read("u1").await.unwrap(), 0);
    }

    #[test]
    fn authenticate_delegates_to_gateway() {
        let (_, processor) = processor();
        let body = b"status=1&platform_order_id=u1-p_trial-1";
        let signature = sign_body(SECRET, body).unwrap();

        let payload = processor.authenticate(Some(&signature), body).unwrap();
        assert_eq!(payload.order_id.as_deref(), Some("u1-p_trial-1"));
        assert_eq!(
            processor.authenticate(Some("00"), body),
            Err(CallbackAuthError::InvalidSignature)
        );
    }
}
