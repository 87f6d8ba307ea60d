//! Inventory Reconciler
//!
//! Applies stock adjustments to the local inventory, one SKU at a time. Used
//! directly by the inventory webhook, by the catalog reconciler for each
//! record's stock, and by the scheduled inventory job.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::aggregates::{
    AdjustmentStatus, InventoryAdjustment, InventoryRecord, LedgerEventType, PerItemResult, SyncLedgerEntry,
};
use crate::domain::{ExternalId, Quantity, RecordOutcome, RunMode, SyncJob, SyncRunResult};
use crate::erp::ErpGateway;
use crate::error::Result;
use crate::store::Repositories;
use crate::sync::locks::KeyedLocks;

pub struct InventoryReconciler {
    erp: Arc<dyn ErpGateway>,
    repos: Repositories,
    locks: KeyedLocks,
    location_id: String,
    create_missing: bool,
    page_size: usize,
}

impl InventoryReconciler {
    pub fn new(
        erp: Arc<dyn ErpGateway>, repos: Repositories, locks: KeyedLocks,
        location_id: impl Into<String>, create_missing: bool, page_size: usize,
    ) -> Self {
        Self { erp, repos, locks, location_id: location_id.into(), create_missing, page_size: page_size.max(1) }
    }

    pub fn location_id(&self) -> &str { &self.location_id }

    /// Apply every adjustment independently. One result per input, in order.
    pub async fn sync_inventory(&self, adjustments: &[InventoryAdjustment]) -> Vec<PerItemResult> {
        let mut results = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            results.push(self.apply(adjustment).await);
        }
        results
    }

    /// Apply one adjustment. Failures are reported in the result, never raised.
    pub async fn apply(&self, adjustment: &InventoryAdjustment) -> PerItemResult {
        let sku = adjustment.sku.trim();
        if sku.is_empty() {
            return PerItemResult::failed(sku, adjustment.mode, "sku is required");
        }
        let _guard = self.locks.lock(KeyedLocks::sku_key(sku)).await;
        match self.write(sku, adjustment).await {
            Ok(result) => result,
            Err(e) => {
                warn!(sku, error = %e, "Inventory adjustment failed");
                PerItemResult::failed(sku, adjustment.mode, e.to_string())
            }
        }
    }

    /// What [`apply`](Self::apply) would do, without writing.
    pub async fn preview(&self, adjustment: &InventoryAdjustment) -> PerItemResult {
        let sku = adjustment.sku.trim();
        if sku.is_empty() {
            return PerItemResult::failed(sku, adjustment.mode, "sku is required");
        }
        match self.repos.inventory.find(sku, &self.location_id).await {
            Ok(Some(current)) => {
                let next = adjustment.mode.apply(current.stocked_quantity, adjustment.quantity);
                PerItemResult::success(sku, adjustment.mode, Some(current.stocked_quantity), next, false)
            }
            Ok(None) if self.create_missing => PerItemResult::success(sku, adjustment.mode, None, Quantity::new(adjustment.quantity), true),
            Ok(None) => PerItemResult::not_found(sku, adjustment.mode),
            Err(e) => PerItemResult::failed(sku, adjustment.mode, e.to_string()),
        }
    }

    async fn write(&self, sku: &str, adjustment: &InventoryAdjustment) -> Result<PerItemResult> {
        match self.repos.inventory.find(sku, &self.location_id).await? {
            Some(current) => {
                let next = adjustment.mode.apply(current.stocked_quantity, adjustment.quantity);
                if next != current.stocked_quantity {
                    self.repos.inventory.set_quantity(current.id, next).await?;
                }
                Ok(PerItemResult::success(sku, adjustment.mode, Some(current.stocked_quantity), next, false))
            }
            None if self.create_missing => {
                // A missing record starts from zero, so either mode lands on the floored quantity.
                let quantity = Quantity::new(adjustment.quantity);
                self.repos.inventory.insert(&InventoryRecord::create(sku, &self.location_id, quantity)).await?;
                info!(sku, location_id = %self.location_id, quantity = quantity.value(), "Created inventory record");
                Ok(PerItemResult::success(sku, adjustment.mode, None, quantity, true))
            }
            None => Ok(PerItemResult::not_found(sku, adjustment.mode)),
        }
    }

    /// Scheduled job: pull current stock for every linked product and set it.
    pub async fn run(&self, mode: RunMode, cancel: &CancellationToken) -> SyncRunResult {
        let mut result = SyncRunResult::start(SyncJob::Inventory, mode);
        info!(run_id = %result.run_id, mode = mode.as_str(), "Inventory sync started");

        if let Err(e) = self.erp.authenticate().await {
            result.abort(auth_failure(&e));
            return self.finish(result).await;
        }

        let started = Utc::now();
        let mut offset = 0;
        'pages: loop {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let entries = match self.repos.ledger.list(self.page_size, offset).await {
                Ok(entries) => entries,
                Err(e) => {
                    result.abort(format!("reading sync ledger at offset {offset} failed: {e}"));
                    break;
                }
            };
            if entries.is_empty() { break; }
            offset += entries.len();

            let ids: Vec<ExternalId> = entries.iter().map(|e| e.external_id).collect();
            let stock: HashMap<ExternalId, i64> = match self.erp.fetch_stock(&ids).await {
                Ok(levels) => levels.into_iter().collect(),
                Err(e) if e.is_run_fatal() => {
                    result.abort(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(offset, error = %e, "Stock fetch failed for page");
                    for id in &ids { result.record_failure(format!("external_id {id}: {e}")); }
                    continue;
                }
            };

            for entry in &entries {
                if cancel.is_cancelled() {
                    result.cancelled = true;
                    break 'pages;
                }
                let Some(quantity) = stock.get(&entry.external_id).copied() else {
                    warn!(external_id = %entry.external_id, "ERP returned no stock for linked product");
                    result.record(RecordOutcome::Skipped);
                    continue;
                };
                match self.reconcile_entry(entry, quantity, mode).await {
                    Ok(outcome) => result.record(outcome),
                    Err(message) => result.record_failure(format!("external_id {}: {message}", entry.external_id)),
                }
            }

            if entries.len() < self.page_size { break; }
        }

        if !mode.is_dry_run() && !result.aborted && !result.cancelled {
            if let Err(e) = self.repos.state.set_last_sync_at(SyncJob::Inventory, started).await {
                warn!(error = %e, "Could not record inventory watermark");
            }
        }
        self.finish(result).await
    }

    async fn reconcile_entry(&self, entry: &SyncLedgerEntry, quantity: i64, mode: RunMode) -> std::result::Result<RecordOutcome, String> {
        let sku = match &entry.sku {
            Some(sku) => sku.clone(),
            None => {
                let item = self.repos.catalog.find_item(entry.catalog_item_id).await.map_err(|e| e.to_string())?;
                item.as_ref().and_then(|i| i.default_variant()).map(|v| v.sku.as_str().to_string())
                    .ok_or_else(|| format!("catalog item {} has no variant", entry.catalog_item_id))?
            }
        };
        let adjustment = InventoryAdjustment::absolute(sku, quantity).with_reason("scheduled inventory sync");
        let outcome = if mode.is_dry_run() { self.preview(&adjustment).await } else { self.apply(&adjustment).await };
        match outcome.status {
            AdjustmentStatus::Success => {
                if !mode.is_dry_run() {
                    if let Err(e) = self.repos.ledger.touch(entry.external_id, LedgerEventType::Inventory, Utc::now()).await {
                        warn!(external_id = %entry.external_id, error = %e, "Could not touch ledger entry");
                    }
                }
                Ok(if outcome.created { RecordOutcome::Created } else { RecordOutcome::Updated })
            }
            AdjustmentStatus::NotFound => Ok(RecordOutcome::Skipped),
            AdjustmentStatus::Failed => Err(outcome.error.unwrap_or_else(|| "inventory update failed".into())),
        }
    }

    async fn finish(&self, result: SyncRunResult) -> SyncRunResult {
        let result = result.finish();
        if let Err(e) = self.repos.state.record_run(&result).await {
            warn!(run_id = %result.run_id, error = %e, "Could not record inventory run");
        }
        info!(
            run_id = %result.run_id, created = result.created, updated = result.updated, skipped = result.skipped,
            failed = result.failed, aborted = result.aborted, cancelled = result.cancelled, "Inventory sync finished"
        );
        result
    }
}

/// Run-level message for a failed login.
pub(crate) fn auth_failure(e: &crate::erp::ErpError) -> String {
    match e {
        crate::erp::ErpError::Auth(_) => e.to_string(),
        other => format!("could not authenticate with the ERP: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::FakeErp;

    fn reconciler(store: Arc<MemoryStore>, create_missing: bool) -> InventoryReconciler {
        InventoryReconciler::new(Arc::new(FakeErp::default()), Repositories::from_memory(store), KeyedLocks::new(), "default", create_missing, 50)
    }

    #[tokio::test]
    async fn test_absolute_then_delta_floors_at_zero() {
        let store = Arc::new(MemoryStore::new());
        let inv = reconciler(store.clone(), true);
        let created = inv.apply(&InventoryAdjustment::absolute("X-1", 12)).await;
        assert!(created.is_success() && created.created);
        let shrunk = inv.apply(&InventoryAdjustment::delta("X-1", -5)).await;
        assert_eq!((shrunk.previous_quantity, shrunk.new_quantity), (Some(12), Some(7)));
        let floored = inv.apply(&InventoryAdjustment::delta("X-1", -50)).await;
        assert_eq!(floored.new_quantity, Some(0));
        assert_eq!(store.stock("X-1", "default").await, Some(0));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found_when_creation_disabled() {
        let store = Arc::new(MemoryStore::new());
        let results = reconciler(store.clone(), false).sync_inventory(&[InventoryAdjustment::absolute("NOPE", 3)]).await;
        assert_eq!(results[0].status, AdjustmentStatus::NotFound);
        assert_eq!(store.stock("NOPE", "default").await, None);
    }

    #[tokio::test]
    async fn test_batch_items_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let inv = reconciler(store.clone(), true);
        let batch = vec![InventoryAdjustment::absolute("A", 4), InventoryAdjustment::absolute("  ", 1), InventoryAdjustment::delta("B", -2)];
        let results = inv.sync_inventory(&batch).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert_eq!(results[1].status, AdjustmentStatus::Failed);
        assert_eq!(results[2].new_quantity, Some(0));
        assert_eq!(store.stock("A", "default").await, Some(4));
    }

    #[tokio::test]
    async fn test_concurrent_deltas_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let inv = Arc::new(reconciler(store.clone(), true));
        inv.apply(&InventoryAdjustment::absolute("C", 0)).await;
        let tasks: Vec<_> = (0..20).map(|_| {
            let inv = inv.clone();
            tokio::spawn(async move { inv.apply(&InventoryAdjustment::delta("C", 1)).await })
        }).collect();
        for t in tasks { assert!(t.await.unwrap().is_success()); }
        assert_eq!(store.stock("C", "default").await, Some(20));
    }

    #[tokio::test]
    async fn test_preview_does_not_write() {
        let store = Arc::new(MemoryStore::new());
        let preview = reconciler(store.clone(), true).preview(&InventoryAdjustment::absolute("P", 9)).await;
        assert!(preview.created);
        assert_eq!(store.stock("P", "default").await, None);
    }
}
