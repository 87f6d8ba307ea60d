//! Per-key write locks.
//!
//! Reconcilers, webhooks and the order propagator may touch the same SKU or
//! external id at the same time. Writes to one key are serialised here; keys
//! never block each other. Hold a guard only around the store writes, never
//! across an ERP call. Order locks are the exception: one covers a whole
//! propagation attempt so an order is never sent to the ERP twice.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::ExternalId;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self { Self::default() }

    pub fn sku_key(sku: &str) -> String { format!("sku:{sku}") }
    pub fn external_key(id: ExternalId) -> String { format!("ext:{id}") }
    /// Single key guarding handle allocation; candidates of one base can be the base of another.
    pub fn handles_key() -> String { "handles".to_string() }
    pub fn order_key(id: Uuid) -> String { format!("order:{id}") }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: impl Into<String>) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key.into()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        mutex.lock_owned().await
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune_idle(&self) {
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn len(&self) -> usize { self.locks.len() }
    pub fn is_empty(&self) -> bool { self.locks.is_empty() }
}
