//! Per-subscription serialization
//!
//! Every mutating operation on one subscription runs under that
//! subscription's lock; operations on different subscriptions proceed in
//! parallel. Guards are owned so they can ride across await points, and
//! callers must release before any retried external call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use vendhub_shared::types::SubscriptionId;

/// Registry of per-subscription async locks
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<SubscriptionId, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one subscription, waiting if another operation
    /// holds it
    pub async fn acquire(&self, subscription_id: SubscriptionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(subscription_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
