//! In-process store.
//!
//! Backs the test suite and local runs without a database. Enforces the same
//! uniqueness rules as the Postgres schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CatalogRepository, InventoryRepository, LedgerRepository, OrderRepository, StoreError, StoreResult,
    SyncStateRepository,
};
use crate::domain::aggregates::{CatalogItem, InventoryRecord, LedgerEventType, Order, SyncLedgerEntry};
use crate::domain::{ExternalId, Quantity, SyncJob, SyncRunResult};

#[derive(Default)]
struct Inner {
    items: HashMap<Uuid, CatalogItem>,
    handles: HashSet<String>,
    skus: HashMap<String, Uuid>,
    channels: HashSet<(Uuid, String)>,
    inventory: HashMap<(String, String), InventoryRecord>,
    ledger: BTreeMap<ExternalId, SyncLedgerEntry>,
    orders: HashMap<Uuid, Order>,
    last_sync: HashMap<SyncJob, DateTime<Utc>>,
    runs: Vec<SyncRunResult>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn item_count(&self) -> usize { self.inner.lock().await.items.len() }

    pub async fn items(&self) -> Vec<CatalogItem> {
        let mut items: Vec<_> = self.inner.lock().await.items.values().cloned().collect();
        items.sort_by_key(|i| i.created_at);
        items
    }

    pub async fn channels_of(&self, item_id: Uuid) -> Vec<String> {
        let mut channels: Vec<_> = self.inner.lock().await.channels.iter()
            .filter(|(id, _)| *id == item_id).map(|(_, c)| c.clone()).collect();
        channels.sort();
        channels
    }

    pub async fn ledger_len(&self) -> usize { self.inner.lock().await.ledger.len() }

    pub async fn stock(&self, sku: &str, location_id: &str) -> Option<i64> {
        self.inner.lock().await.inventory.get(&(sku.to_string(), location_id.to_string())).map(|r| r.stocked_quantity.value())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn find_item(&self, id: Uuid) -> StoreResult<Option<CatalogItem>> {
        Ok(self.inner.lock().await.items.get(&id).cloned())
    }

    async fn find_item_by_sku(&self, sku: &str) -> StoreResult<Option<CatalogItem>> {
        let inner = self.inner.lock().await;
        Ok(inner.skus.get(sku).and_then(|id| inner.items.get(id)).cloned())
    }

    async fn handle_taken(&self, handle: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().await.handles.contains(handle))
    }

    async fn insert_item(&self, item: &CatalogItem) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.items.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("catalog item {} already exists", item.id)));
        }
        if inner.handles.contains(item.handle.as_str()) {
            return Err(StoreError::Conflict(format!("handle '{}' already exists", item.handle)));
        }
        if let Some(v) = item.variants.iter().find(|v| inner.skus.contains_key(v.sku.as_str())) {
            return Err(StoreError::Conflict(format!("sku '{}' already exists", v.sku)));
        }
        inner.handles.insert(item.handle.as_str().to_string());
        for v in &item.variants { inner.skus.insert(v.sku.as_str().to_string(), item.id); }
        inner.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_item(&self, item: &CatalogItem) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner.items.get_mut(&item.id).ok_or_else(|| StoreError::NotFound(format!("catalog item {}", item.id)))?;
        stored.title = item.title.clone();
        stored.description = item.description.clone();
        stored.status = item.status.clone();
        stored.metadata = item.metadata.clone();
        stored.thumbnail = item.thumbnail.clone();
        stored.updated_at = item.updated_at;
        Ok(())
    }

    async fn attach_sales_channel(&self, item_id: Uuid, channel_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.items.contains_key(&item_id) {
            return Err(StoreError::NotFound(format!("catalog item {item_id}")));
        }
        inner.channels.insert((item_id, channel_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl InventoryRepository for MemoryStore {
    async fn find(&self, sku: &str, location_id: &str) -> StoreResult<Option<InventoryRecord>> {
        Ok(self.inner.lock().await.inventory.get(&(sku.to_string(), location_id.to_string())).cloned())
    }

    async fn insert(&self, record: &InventoryRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let key = (record.sku.clone(), record.location_id.clone());
        if inner.inventory.contains_key(&key) {
            return Err(StoreError::Conflict(format!("inventory for '{}' at '{}' already exists", record.sku, record.location_id)));
        }
        inner.inventory.insert(key, record.clone());
        Ok(())
    }

    async fn set_quantity(&self, id: Uuid, quantity: Quantity) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let record = inner.inventory.values_mut().find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("inventory record {id}")))?;
        record.stocked_quantity = quantity;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn find(&self, external_id: ExternalId) -> StoreResult<Option<SyncLedgerEntry>> {
        Ok(self.inner.lock().await.ledger.get(&external_id).cloned())
    }

    async fn link(&self, entry: &SyncLedgerEntry) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.ledger.get_mut(&entry.external_id) {
            Some(existing) if !existing.targets(entry.catalog_item_id) => Err(StoreError::Conflict(format!(
                "external id {} is linked to catalog item {}", entry.external_id, existing.catalog_item_id
            ))),
            Some(existing) => {
                existing.last_synced_at = entry.last_synced_at;
                existing.last_event_type = entry.last_event_type;
                if entry.variant_id.is_some() { existing.variant_id = entry.variant_id; }
                if entry.sku.is_some() { existing.sku = entry.sku.clone(); }
                Ok(())
            }
            None => {
                inner.ledger.insert(entry.external_id, entry.clone());
                Ok(())
            }
        }
    }

    async fn touch(&self, external_id: ExternalId, event: LedgerEventType, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.ledger.get_mut(&external_id).ok_or_else(|| StoreError::NotFound(format!("ledger entry {external_id}")))?;
        entry.last_synced_at = at;
        entry.last_event_type = event;
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> StoreResult<Vec<SyncLedgerEntry>> {
        Ok(self.inner.lock().await.ledger.values().skip(offset).take(limit).cloned().collect())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        self.inner.lock().await.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_erp_order_id(&self, erp_order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().await.orders.values().find(|o| match o.metadata.get("erp_order_id") {
            Some(Value::String(s)) => s == erp_order_id,
            Some(Value::Number(n)) => n.to_string() == erp_order_id,
            _ => false,
        }).cloned())
    }

    async fn merge_metadata(&self, id: Uuid, patch: Map<String, Value>) -> StoreResult<Order> {
        let mut inner = self.inner.lock().await;
        let order = inner.orders.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        order.merge_metadata(patch);
        Ok(order.clone())
    }
}

#[async_trait]
impl SyncStateRepository for MemoryStore {
    async fn last_sync_at(&self, job: SyncJob) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.inner.lock().await.last_sync.get(&job).copied())
    }

    async fn set_last_sync_at(&self, job: SyncJob, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.lock().await.last_sync.insert(job, at);
        Ok(())
    }

    async fn record_run(&self, run: &SyncRunResult) -> StoreResult<()> {
        self.inner.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn last_run(&self, job: SyncJob) -> StoreResult<Option<SyncRunResult>> {
        Ok(self.inner.lock().await.runs.iter().rev().find(|r| r.job == job).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExternalRecord, Handle};

    fn item(external_id: i64, name: &str, sku: &str) -> CatalogItem {
        let record = ExternalRecord::new(external_id, name).with_sku(sku);
        CatalogItem::from_external(&record, Handle::slugify(name).unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_handle_and_sku() {
        let store = MemoryStore::new();
        store.insert_item(&item(1, "Mouse", "M-1")).await.unwrap();
        assert!(matches!(store.insert_item(&item(2, "Mouse", "M-2")).await, Err(StoreError::Conflict(_))));
        assert!(matches!(store.insert_item(&item(3, "Mouse Pad", "M-1")).await, Err(StoreError::Conflict(_))));
        assert_eq!(store.item_count().await, 1);
        assert!(store.find_item_by_sku("M-1").await.unwrap().is_some());
        assert!(store.handle_taken("mouse").await.unwrap());
    }

    #[tokio::test]
    async fn test_link_refuses_silent_retarget() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        store.link(&SyncLedgerEntry::link(ExternalId::new(9), a, None, None, now)).await.unwrap();
        store.link(&SyncLedgerEntry::link(ExternalId::new(9), a, None, Some("S".into()), now)).await.unwrap();
        assert!(matches!(store.link(&SyncLedgerEntry::link(ExternalId::new(9), b, None, None, now)).await, Err(StoreError::Conflict(_))));
        let stored = LedgerRepository::find(&store, ExternalId::new(9)).await.unwrap().unwrap();
        assert_eq!(stored.sku.as_deref(), Some("S"));
        assert!(stored.targets(a));
    }
}
