// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Concurrent balance mutation tests against the in-memory store.

use betslip_analyzer::db::{BalanceStore, MemoryDb};
use betslip_analyzer::error::AppError;
use betslip_analyzer::services::{SessionManager, VerifiedIdentity};
use std::sync::Arc;

#[tokio::test]
async fn test_two_decrements_on_last_credit() {
    let store = Arc::new(MemoryDb::new());
    store.create_account("uid1", None, 1).await.unwrap();

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.transactional_decrement("uid1").await })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.transactional_decrement("uid1").await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::InsufficientCredits)))
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(refused, 1);
    assert_eq!(store.read("uid1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_decrements_and_credits_interleave_without_loss() {
    let store = Arc::new(MemoryDb::new());
    store.create_account("uid1", None, 10).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                store.transactional_decrement("uid1").await.map(|_| ())
            } else {
                store.increment("uid1", 1).await.map(|_| ())
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Ten credits in, ten out.
    assert_eq!(store.read("uid1").await.unwrap(), 10);
}

#[tokio::test]
async fn test_session_decrements_share_one_balance() {
    let store = Arc::new(MemoryDb::new());
    store.create_account("uid1", None, 3).await.unwrap();
    let sessions = Arc::new(SessionManager::new(store.clone()));

    let session = sessions
        .sign_in(VerifiedIdentity {
            user_id: "uid1".to_string(),
            email: None,
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let session = session.clone();
        handles.push(tokio::spawn(async move { session.decrement_balance().await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(balance) => {
                assert!(balance >= 0);
                succeeded += 1;
            }
            Err(AppError::InsufficientCredits) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(store.read("uid1").await.unwrap(), 0);
}
