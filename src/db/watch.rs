// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user balance change fan-out.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Registry of live balance channels, one per watched user.
///
/// Stores publish after every committed mutation. Channels with no
/// receivers left are dropped on the next publish or prune.
#[derive(Clone, Default)]
pub struct BalanceWatchers {
    channels: Arc<DashMap<String, watch::Sender<Option<i64>>>>,
}

impl BalanceWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a user's balance. Returns the receiver and whether the
    /// channel was newly created.
    pub fn subscribe(&self, user_id: &str) -> (watch::Receiver<Option<i64>>, bool) {
        if let Some(sender) = self.channels.get(user_id) {
            return (sender.subscribe(), false);
        }

        let mut created = false;
        let receiver = self
            .channels
            .entry(user_id.to_string())
            .or_insert_with(|| {
                created = true;
                watch::channel(None).0
            })
            .subscribe();
        (receiver, created)
    }

    /// Publish a new balance to every receiver of this user.
    pub fn publish(&self, user_id: &str, balance: i64) {
        let stale = match self.channels.get(user_id) {
            Some(sender) => {
                sender.send_if_modified(|current| {
                    if *current == Some(balance) {
                        false
                    } else {
                        *current = Some(balance);
                        true
                    }
                });
                sender.receiver_count() == 0
            }
            None => false,
        };

        if stale {
            self.channels
                .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// Whether anyone still listens to this user's balance.
    pub fn has_receivers(&self, user_id: &str) -> bool {
        self.channels
            .get(user_id)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }

    /// Drop the channel if no receivers remain.
    pub fn prune(&self, user_id: &str) {
        self.channels
            .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
    }
}
