// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Signed-in sessions and their live balance subscription.
//!
//! A session mirrors the store's balance for one user into its own watch
//! channel. The mirrored value only ever changes through that subscription
//! (or an explicit refresh); local operations never patch it.
//!
//! Only sign-in subscribes a session to the store. Sessions that carry
//! nothing live (no run in flight, no UI receiver) are evicted once idle.

use crate::config::TRIAL_CREDITS;
use crate::db::{BalanceStore, CreateAccountOutcome};
use crate::error::AppError;
use crate::models::RunState;
use crate::services::identity::VerifiedIdentity;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct RunSlot {
    generation: u64,
    in_flight: bool,
    state: RunState,
}

/// One signed-in user.
pub struct Session {
    identity: VerifiedIdentity,
    store: Arc<dyn BalanceStore>,
    balance_tx: Arc<watch::Sender<Option<i64>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    run: Mutex<RunSlot>,
    last_active: Mutex<Instant>,
}

impl Session {
    fn new(identity: VerifiedIdentity, store: Arc<dyn BalanceStore>) -> Self {
        let (balance_tx, _) = watch::channel(None);
        Self {
            identity,
            store,
            balance_tx: Arc::new(balance_tx),
            forwarder: Mutex::new(None),
            run: Mutex::new(RunSlot {
                generation: 0,
                in_flight: false,
                state: RunState::Idle,
            }),
            last_active: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *lock(&self.last_active) = Instant::now();
    }

    /// Whether the store subscription is running.
    pub fn is_subscribed(&self) -> bool {
        lock(&self.forwarder).is_some()
    }

    /// Nothing depends on this session and it has not been used for
    /// `max_idle`.
    fn is_idle(&self, max_idle: Duration) -> bool {
        !lock(&self.run).in_flight
            && self.balance_tx.receiver_count() == 0
            && lock(&self.last_active).elapsed() >= max_idle
    }

    /// Start mirroring the store's live view into this session.
    fn attach(&self) {
        let mut source = self.store.watch(&self.identity.user_id);
        let sink = self.balance_tx.clone();
        let user_id = self.identity.user_id.clone();

        let handle = tokio::spawn(async move {
            loop {
                let value = *source.borrow_and_update();
                if let Some(balance) = value {
                    publish(&sink, Some(balance));
                }
                if source.changed().await.is_err() {
                    tracing::debug!(user_id = %user_id, "Balance source closed");
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.forwarder).replace(handle) {
            previous.abort();
        }
    }

    /// Tear down the subscription and clear the value seen by subscribers.
    fn detach(&self) {
        if let Some(handle) = lock(&self.forwarder).take() {
            handle.abort();
        }
        publish(&self.balance_tx, None);
    }

    pub fn identity(&self) -> &VerifiedIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Last balance delivered by the subscription.
    pub fn balance(&self) -> Option<i64> {
        *self.balance_tx.borrow()
    }

    /// Receiver for UI consumers.
    pub fn subscribe(&self) -> watch::Receiver<Option<i64>> {
        self.balance_tx.subscribe()
    }

    /// Consume one credit in the store and return the store's new value.
    ///
    /// The session's own value is left to the subscription.
    pub async fn decrement_balance(&self) -> Result<i64, AppError> {
        self.store.transactional_decrement(self.user_id()).await
    }

    /// One-shot authoritative read, published to subscribers.
    pub async fn refresh_balance(&self) -> Result<i64, AppError> {
        let balance = self.store.read(self.user_id()).await?;
        publish(&self.balance_tx, Some(balance));
        Ok(balance)
    }

    /// Claim the single analysis slot of this session.
    pub fn begin_run(self: &Arc<Self>) -> Result<RunGuard, AppError> {
        let mut slot = lock(&self.run);
        if slot.in_flight {
            return Err(AppError::AnalysisInProgress);
        }
        slot.generation += 1;
        slot.in_flight = true;
        slot.state = RunState::Running;

        Ok(RunGuard {
            session: self.clone(),
            generation: slot.generation,
            finished: false,
        })
    }

    pub fn run_state(&self) -> RunState {
        lock(&self.run).state.clone()
    }

    /// Abandon the current run (if any) and return to idle.
    ///
    /// A run that is still executing keeps going, but its result is no
    /// longer recorded.
    pub fn reset_run(&self) {
        let mut slot = lock(&self.run);
        slot.generation += 1;
        slot.in_flight = false;
        slot.state = RunState::Idle;
    }
}

/// Exclusive claim on a session's analysis slot.
pub struct RunGuard {
    session: Arc<Session>,
    generation: u64,
    finished: bool,
}

impl RunGuard {
    /// Record the final state and release the slot.
    ///
    /// Returns false when the run was reset in the meantime.
    pub fn finish(mut self, state: RunState) -> bool {
        self.finished = true;
        let mut slot = lock(&self.session.run);
        if slot.generation != self.generation {
            return false;
        }
        slot.in_flight = false;
        slot.state = state;
        true
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut slot = lock(&self.session.run);
        if slot.generation == self.generation {
            slot.in_flight = false;
            slot.state = RunState::Failed {
                error: "internal_error".to_string(),
                message: "The analysis was interrupted.".to_string(),
            };
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn publish(sender: &watch::Sender<Option<i64>>, value: Option<i64>) {
    sender.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

/// Registry of live sessions, one per user.
pub struct SessionManager {
    store: Arc<dyn BalanceStore>,
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
        }
    }

    /// Return the user's session, creating and subscribing it if needed.
    pub async fn sign_in(&self, identity: VerifiedIdentity) -> Result<Arc<Session>, AppError> {
        let user_id = identity.user_id.clone();
        let session = self.get_or_insert(identity);
        if !session.is_subscribed() {
            session.attach();
        }

        session.refresh_balance().await?;

        tracing::info!(
            user_id = %user_id,
            credits = ?session.balance(),
            "Session established"
        );
        Ok(session)
    }

    /// Remove the user's session and stop its subscription.
    pub fn sign_out(&self, user_id: &str) -> bool {
        match self.sessions.remove(user_id) {
            Some((_, session)) => {
                session.detach();
                tracing::info!(user_id, "Session closed");
                true
            }
            None => false,
        }
    }

    pub fn session(&self, user_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(user_id).map(|s| s.clone())?;
        session.touch();
        Some(session)
    }

    /// Session to run an analysis in.
    ///
    /// Reuses the signed-in session; otherwise registers one without a
    /// store subscription, which the idle sweep reclaims later.
    pub fn for_analysis(&self, identity: VerifiedIdentity) -> Arc<Session> {
        self.get_or_insert(identity)
    }

    fn get_or_insert(&self, identity: VerifiedIdentity) -> Arc<Session> {
        if let Some(existing) = self.session(&identity.user_id) {
            return existing;
        }
        let store = self.store.clone();
        self.sessions
            .entry(identity.user_id.clone())
            .or_insert_with(|| Arc::new(Session::new(identity, store)))
            .clone()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle for at least `max_idle` and stop their
    /// subscriptions. Returns how many were evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(max_idle))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for user_id in candidates {
            if let Some((_, session)) = self
                .sessions
                .remove_if(&user_id, |_, session| session.is_idle(max_idle))
            {
                session.detach();
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::info!(evicted, remaining = self.sessions.len(), "Idle sessions evicted");
        }
        evicted
    }

    /// Periodically evict idle sessions. Runs until the task is dropped.
    pub async fn sweep_idle(&self, every: Duration, max_idle: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.evict_idle(max_idle);
        }
    }

    /// Create the account record with the trial grant, at most once.
    pub async fn register(
        &self,
        identity: &VerifiedIdentity,
    ) -> Result<CreateAccountOutcome, AppError> {
        let outcome = self
            .store
            .create_account(&identity.user_id, identity.email.as_deref(), TRIAL_CREDITS)
            .await
            .map_err(|e| match e {
                AppError::BadRequest(_) => e,
                other => AppError::RegistrationIncomplete(other.to_string()),
            })?;

        if let CreateAccountOutcome::Created(record) = &outcome {
            tracing::info!(
                user_id = %identity.user_id,
                credits = record.credits,
                "Account registered with trial credits"
            );
        }

        Ok(outcome)
    }
}
