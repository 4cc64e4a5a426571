//! Pending-action storage seam and the in-memory backend.
//!
//! The store owns suspended write actions. `confirm` is an atomic take:
//! under concurrent confirm/cancel calls at most one caller receives the
//! action. Expired entries are removed on the read path; `cleanup` sweeps
//! the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use teller_domain::pending::PendingAction;
use teller_domain::{Error, Result};

/// Abstract pending-action backend.
///
/// All operations are keyed by `(user_id, action_id)`. Ownership
/// mismatches surface as "not found", never as an authorization error, so
/// callers cannot probe for other users' actions.
#[async_trait::async_trait]
pub trait PendingActionStore: Send + Sync {
    /// Persist with the action's declared expiry.
    async fn store(&self, action: PendingAction) -> Result<()>;

    /// Fetch a live action. Fails when missing, owned by another user, or
    /// expired; expired entries are removed as a side effect.
    async fn get(&self, user_id: &str, action_id: &str) -> Result<PendingAction>;

    /// The live action with this idempotency key, if any. Absence is not
    /// an error.
    async fn get_by_idempotency(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<PendingAction>>;

    /// Atomic claim: when live and owned, remove and return the action in
    /// one step. Exactly one of any set of concurrent claims succeeds.
    async fn confirm(&self, user_id: &str, action_id: &str) -> Result<PendingAction>;

    /// Remove without returning.
    async fn cancel(&self, user_id: &str, action_id: &str) -> Result<()>;

    /// Sweep expired entries; returns the count removed.
    async fn cleanup(&self) -> Result<usize>;
}

/// In-process map-backed store.
///
/// A single mutex covers every operation, which makes `confirm` and
/// `cancel` linearizable with respect to `store` and TTL eviction.
#[derive(Default)]
pub struct InMemoryPendingActionStore {
    actions: Mutex<HashMap<String, PendingAction>>,
}

impl InMemoryPendingActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored actions, expired ones included.
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    fn not_found(action_id: &str) -> Error {
        Error::NotFound(format!("pending action {action_id}"))
    }
}

#[async_trait::async_trait]
impl PendingActionStore for InMemoryPendingActionStore {
    async fn store(&self, action: PendingAction) -> Result<()> {
        self.actions.lock().insert(action.id.clone(), action);
        Ok(())
    }

    async fn get(&self, user_id: &str, action_id: &str) -> Result<PendingAction> {
        let now = Utc::now();
        let mut actions = self.actions.lock();
        match actions.get(action_id) {
            Some(action) if action.user_id != user_id => Err(Self::not_found(action_id)),
            Some(action) if action.is_expired(now) => {
                actions.remove(action_id);
                Err(Self::not_found(action_id))
            }
            Some(action) => Ok(action.clone()),
            None => Err(Self::not_found(action_id)),
        }
    }

    async fn get_by_idempotency(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<PendingAction>> {
        let now = Utc::now();
        let actions = self.actions.lock();
        Ok(actions
            .values()
            .find(|a| a.user_id == user_id && a.idempotency_key == key && !a.is_expired(now))
            .cloned())
    }

    async fn confirm(&self, user_id: &str, action_id: &str) -> Result<PendingAction> {
        let now = Utc::now();
        let mut actions = self.actions.lock();
        let owned = actions
            .get(action_id)
            .is_some_and(|a| a.user_id == user_id);
        if !owned {
            return Err(Self::not_found(action_id));
        }
        // Ownership transfers out in the same step that removes the entry;
        // an expired entry stays removed but is not returned.
        let Some(action) = actions.remove(action_id) else {
            return Err(Self::not_found(action_id));
        };
        if action.is_expired(now) {
            return Err(Self::not_found(action_id));
        }
        Ok(action)
    }

    async fn cancel(&self, user_id: &str, action_id: &str) -> Result<()> {
        let mut actions = self.actions.lock();
        match actions.get(action_id) {
            Some(action) if action.user_id == user_id => {
                actions.remove(action_id);
                Ok(())
            }
            _ => Err(Self::not_found(action_id)),
        }
    }

    async fn cleanup(&self) -> Result<usize> {
        let now = Utc::now();
        let mut actions = self.actions.lock();
        let before = actions.len();
        actions.retain(|_, action| !action.is_expired(now));
        Ok(before - actions.len())
    }
}

/// Spawn a background task that sweeps expired pending actions on an
/// interval, logging the evicted count.
pub fn spawn_pending_sweeper(
    store: Arc<dyn PendingActionStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match store.cleanup().await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, "swept expired pending actions");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pending-action sweep failed");
                }
            }
        }
    })
}
