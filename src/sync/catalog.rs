//! Catalog Reconciler
//!
//! Pulls ERP products page by page and creates or updates the matching
//! catalog items. Records are independent: one failure is counted and the run
//! moves on. Only authentication failures and page fetch failures stop a run;
//! writes made before the stop are kept.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use futures::{future, stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FieldToggles, SyncConfig, MAX_CONCURRENCY};
use crate::domain::aggregates::catalog_item::{META_DEACTIVATED_BY_SYNC, META_EXTERNAL_STOCK};
use crate::domain::aggregates::{AdjustmentStatus, CatalogItem, InventoryAdjustment, LedgerEventType, SyncLedgerEntry};
use crate::domain::{ExternalRecord, RecordOutcome, RunMode, SyncJob, SyncRunResult};
use crate::erp::{ErpGateway, ProductQuery};
use crate::error::{Result, SyncError};
use crate::store::{Repositories, StoreError};
use crate::sync::identity::{IdentityResolver, MatchSource, Resolution};
use crate::sync::inventory::{auth_failure, InventoryReconciler};
use crate::sync::locks::KeyedLocks;

/// Incremental windows reach back this far past the previous run's start,
/// absorbing clock skew between this service and the ERP.
const WATERMARK_OVERLAP_MINUTES: i64 = 5;

/// Inserts tried per new item when its handle is taken between check and insert.
const MAX_INSERT_ATTEMPTS: u32 = 3;

/// Parameters of one catalog run. Unset overrides fall back to configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RunRequest {
    pub limit: Option<usize>,
    #[serde(default, alias = "dryRun")]
    pub dry_run: bool,
    pub sync_title: Option<bool>,
    pub sync_description: Option<bool>,
    pub incremental: Option<bool>,
}

/// How a single record is applied.
#[derive(Clone, Copy, Debug)]
pub struct ApplyOptions {
    pub toggles: FieldToggles,
    pub mode: RunMode,
    /// The record's stock figure came from the ERP and should be applied.
    pub stock_known: bool,
    pub from_webhook: bool,
}

pub struct CatalogReconciler {
    erp: Arc<dyn ErpGateway>,
    repos: Repositories,
    resolver: IdentityResolver,
    inventory: Arc<InventoryReconciler>,
    locks: KeyedLocks,
    config: Arc<SyncConfig>,
}

impl CatalogReconciler {
    pub fn new(
        erp: Arc<dyn ErpGateway>, repos: Repositories, inventory: Arc<InventoryReconciler>,
        locks: KeyedLocks, config: Arc<SyncConfig>,
    ) -> Self {
        let resolver = IdentityResolver::new(repos.clone());
        Self { erp, repos, resolver, inventory, locks, config }
    }

    pub fn config(&self) -> &SyncConfig { &self.config }

    pub async fn run(&self, request: &RunRequest, cancel: &CancellationToken) -> SyncRunResult {
        let mode = RunMode::from_dry_run(request.dry_run);
        let mut result = SyncRunResult::start(SyncJob::Catalog, mode);
        let options = ApplyOptions {
            toggles: self.config.fields.with_overrides(request.sync_title, request.sync_description),
            mode,
            stock_known: true,
            from_webhook: false,
        };
        info!(run_id = %result.run_id, mode = mode.as_str(), limit = ?request.limit, "Catalog sync started");

        if let Err(e) = self.erp.authenticate().await {
            result.abort(auth_failure(&e));
            return self.finish(result).await;
        }

        let since = if request.incremental.unwrap_or(self.config.incremental) {
            match self.repos.state.last_sync_at(SyncJob::Catalog).await {
                Ok(since) => since,
                Err(e) => {
                    result.abort(format!("reading catalog watermark failed: {e}"));
                    return self.finish(result).await;
                }
            }
        } else {
            None
        };
        let watermark = Utc::now() - chrono::Duration::minutes(WATERMARK_OVERLAP_MINUTES);

        match self.erp.fetch_product_count(since).await {
            Ok(total) => result.fetched_total = Some(total),
            Err(e) => warn!(error = %e, "Could not count ERP products"),
        }

        let page_size = self.config.page_size.max(1);
        let concurrency = self.config.concurrency.clamp(1, MAX_CONCURRENCY);
        let mut offset = 0;
        let mut exhausted = false;
        loop {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let want = match request.limit {
                Some(limit) => page_size.min(limit.saturating_sub(offset)),
                None => page_size,
            };
            if want == 0 { break; }

            let query = ProductQuery { limit: want, offset, since, include_images: self.config.import_images };
            let page = match self.erp.fetch_products(&query).await {
                Ok(page) => page,
                Err(e) => {
                    result.abort(format!("fetching products at offset {offset} failed: {e}"));
                    break;
                }
            };
            let received = page.len();
            offset += received;
            debug!(offset, received, "Fetched product page");

            let first_pass: Vec<_> = stream::iter(&page)
                .take_while(|_| future::ready(!cancel.is_cancelled()))
                .map(|record| async move { (record, self.apply_existing(record, options).await) })
                .buffered(concurrency)
                .boxed()
                .collect()
                .await;
            let mut stopped = first_pass.len() < received;

            // New items are created one at a time in fetch order; handle suffixes follow input order.
            for (record, outcome) in first_pass {
                let outcome = match outcome {
                    Ok(Some(outcome)) => Ok(outcome),
                    Ok(None) if cancel.is_cancelled() => {
                        stopped = true;
                        continue;
                    }
                    Ok(None) => self.apply_new(record, options).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(outcome) => result.record(outcome),
                    Err(e) => {
                        warn!(external_id = %record.external_id, error = %e, "Catalog record failed");
                        result.record_failure(format!("external_id {}: {e}", record.external_id));
                    }
                }
            }

            if stopped {
                result.cancelled = true;
                break;
            }
            if received < want {
                exhausted = true;
                break;
            }
        }

        // A run cut short by `limit` leaves the window where it was.
        if !mode.is_dry_run() && exhausted && !result.aborted && !result.cancelled {
            if let Err(e) = self.repos.state.set_last_sync_at(SyncJob::Catalog, watermark).await {
                warn!(error = %e, "Could not record catalog watermark");
            }
        }
        self.finish(result).await
    }

    /// Reconcile one ERP record against the catalog.
    ///
    /// Identity is resolved before any lock is taken; the per-record lock only
    /// covers the catalog and ledger writes.
    pub async fn apply_record(&self, record: &ExternalRecord, options: ApplyOptions) -> Result<RecordOutcome> {
        match self.apply_existing(record, options).await? {
            Some(outcome) => Ok(outcome),
            None => self.apply_new(record, options).await,
        }
    }

    /// Everything except creation. `None` means the record needs a new catalog item.
    async fn apply_existing(&self, record: &ExternalRecord, options: ApplyOptions) -> Result<Option<RecordOutcome>> {
        let resolution = self.resolver.resolve(record).await?;
        if options.mode.is_dry_run() {
            return Ok(Some(match resolution {
                Resolution::Linked { .. } => RecordOutcome::Updated,
                Resolution::Unlinked if !record.active => RecordOutcome::Skipped,
                Resolution::Unlinked => RecordOutcome::Created,
            }));
        }
        match resolution {
            Resolution::Linked { item, via } => {
                let guard = self.locks.lock(KeyedLocks::external_key(record.external_id)).await;
                let (outcome, sku) = self.update_linked(item, via, record, options).await?;
                drop(guard);
                self.sync_stock(sku, record, options).await?;
                Ok(Some(outcome))
            }
            Resolution::Unlinked if !record.active => {
                debug!(external_id = %record.external_id, "Skipping inactive record with no catalog item");
                Ok(Some(RecordOutcome::Skipped))
            }
            Resolution::Unlinked => Ok(None),
        }
    }

    async fn apply_new(&self, record: &ExternalRecord, options: ApplyOptions) -> Result<RecordOutcome> {
        let guard = self.locks.lock(KeyedLocks::external_key(record.external_id)).await;
        // Another writer may have linked the record while we waited.
        let (outcome, sku) = match self.resolver.resolve(record).await? {
            Resolution::Linked { item, via } => self.update_linked(item, via, record, options).await?,
            Resolution::Unlinked => self.create(record, options).await?,
        };
        drop(guard);
        self.sync_stock(sku, record, options).await?;
        Ok(outcome)
    }

    async fn sync_stock(&self, sku: Option<String>, record: &ExternalRecord, options: ApplyOptions) -> Result<()> {
        if !self.config.sync_stock || !options.stock_known { return Ok(()); }
        match sku {
            Some(sku) => self.push_stock(&sku, record).await,
            None => {
                warn!(external_id = %record.external_id, "Catalog item has no variant; stock not applied");
                Ok(())
            }
        }
    }

    async fn update_linked(
        &self, item: CatalogItem, via: MatchSource, record: &ExternalRecord, options: ApplyOptions,
    ) -> Result<(RecordOutcome, Option<String>)> {
        let now = Utc::now();
        let mut item = self.repos.catalog.find_item(item.id).await?
            .ok_or_else(|| SyncError::NotFound(format!("catalog item {}", item.id)))?;

        if options.toggles.title && !record.name.trim().is_empty() {
            item.set_title(record.name.trim());
        }
        if options.toggles.description {
            item.set_description(record.description.as_deref());
        }

        let event = if !record.active {
            if item.is_published() {
                item.deactivate();
                item.metadata.insert(META_DEACTIVATED_BY_SYNC.into(), true.into());
            }
            LedgerEventType::Deactivated
        } else {
            if item.metadata.remove(META_DEACTIVATED_BY_SYNC).is_some() {
                item.publish();
            }
            if options.from_webhook { LedgerEventType::Webhook } else { LedgerEventType::Updated }
        };

        item.link_external(record, options.stock_known.then_some(record.stock_quantity), now);
        if item.thumbnail.is_none() {
            self.import_image(&mut item, record).await;
        }
        self.repos.catalog.update_item(&item).await?;

        let variant = item.variants.iter()
            .find(|v| v.external_id() == Some(record.external_id))
            .or_else(|| item.default_variant());
        let sku = variant.map(|v| v.sku.as_str().to_string());
        let mut entry = SyncLedgerEntry::link(record.external_id, item.id, variant.map(|v| v.id), sku.clone(), now);
        entry.last_event_type = event;
        self.repos.ledger.link(&entry).await?;

        debug!(external_id = %record.external_id, item_id = %item.id, ?via, "Updated catalog item");
        Ok((RecordOutcome::Updated, sku))
    }

    async fn create(&self, record: &ExternalRecord, options: ApplyOptions) -> Result<(RecordOutcome, Option<String>)> {
        let now = Utc::now();
        let item = {
            let _handles = self.locks.lock(KeyedLocks::handles_key()).await;
            self.insert_new(record, options, now).await?
        };

        let variant = item.default_variant();
        let sku = variant.map(|v| v.sku.as_str().to_string());
        let entry = SyncLedgerEntry::link(record.external_id, item.id, variant.map(|v| v.id), sku.clone(), now);
        self.repos.ledger.link(&entry).await?;
        self.repos.catalog.attach_sales_channel(item.id, &self.config.default_sales_channel).await?;

        info!(external_id = %record.external_id, item_id = %item.id, handle = %item.handle, "Created catalog item");
        Ok((RecordOutcome::Created, sku))
    }

    /// Another instance may take the chosen handle before the insert lands;
    /// the store reports that as a conflict and the next free handle is tried.
    async fn insert_new(&self, record: &ExternalRecord, options: ApplyOptions, now: chrono::DateTime<Utc>) -> Result<CatalogItem> {
        let mut attempt = 1;
        loop {
            let handle = self.resolver.allocate_handle(record).await?;
            let mut item = CatalogItem::from_external(record, handle, now);
            if !options.stock_known {
                item.metadata.remove(META_EXTERNAL_STOCK);
            }
            self.import_image(&mut item, record).await;
            match self.repos.catalog.insert_item(&item).await {
                Ok(()) => return Ok(item),
                Err(StoreError::Conflict(reason)) if attempt < MAX_INSERT_ATTEMPTS => {
                    debug!(external_id = %record.external_id, handle = %item.handle, reason, "Catalog insert conflicted; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Deactivated products are stocked at zero.
    async fn push_stock(&self, sku: &str, record: &ExternalRecord) -> Result<()> {
        let quantity = if record.active { record.stock_quantity } else { 0 };
        let adjustment = InventoryAdjustment::absolute(sku, quantity).with_reason("catalog sync");
        let result = self.inventory.apply(&adjustment).await;
        match result.status {
            AdjustmentStatus::Success | AdjustmentStatus::NotFound => Ok(()),
            AdjustmentStatus::Failed => Err(SyncError::Internal(format!(
                "stock update for sku '{sku}' failed: {}", result.error.unwrap_or_default()
            ))),
        }
    }

    /// Best effort; a bad or unstorable image never fails the record.
    async fn import_image(&self, item: &mut CatalogItem, record: &ExternalRecord) {
        if !self.config.import_images { return; }
        let (Some(raw), Some(media)) = (record.raw_image.as_deref(), self.repos.media.as_ref()) else { return };
        let bytes = match BASE64.decode(raw.trim()) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return,
            Err(e) => {
                warn!(external_id = %record.external_id, error = %e, "Product image is not valid base64");
                return;
            }
        };
        match media.put(&format!("{}-{}", item.handle, record.external_id), bytes).await {
            Ok(url) => item.thumbnail = Some(url),
            Err(e) => warn!(external_id = %record.external_id, error = %e, "Could not store product image"),
        }
    }

    async fn finish(&self, result: SyncRunResult) -> SyncRunResult {
        let result = result.finish();
        if let Err(e) = self.repos.state.record_run(&result).await {
            warn!(run_id = %result.run_id, error = %e, "Could not record catalog run");
        }
        info!(
            run_id = %result.run_id, created = result.created, updated = result.updated, skipped = result.skipped,
            failed = result.failed, aborted = result.aborted, cancelled = result.cancelled, "Catalog sync finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::ItemStatus;
    use crate::store::media::MemoryMediaStore;
    use crate::store::MemoryStore;
    use crate::test_support::{FailingCatalog, FakeErp, Harness, StaleHandleCatalog};

    #[tokio::test]
    async fn test_wireless_mouse_is_created_then_restocked() {
        let erp = FakeErp::with_products(vec![ExternalRecord::new(501, "Wireless Mouse").with_sku("X-1").with_stock(12)]);
        let h = Harness::new(erp);

        let first = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!((first.created, first.updated, first.failed), (1, 0, 0));
        let item = &h.store.items().await[0];
        assert_eq!(item.handle.as_str(), "wireless-mouse");
        assert_eq!(item.default_variant().unwrap().sku.as_str(), "X-1");
        assert_eq!(h.store.stock("X-1", "default").await, Some(12));
        assert_eq!(h.store.channels_of(item.id).await, vec!["default".to_string()]);

        h.erp.update(|s| s.products[0].stock_quantity = 7);
        let second = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!((second.created, second.updated), (0, 1));
        assert_eq!(h.store.item_count().await, 1);
        assert_eq!(h.store.stock("X-1", "default").await, Some(7));
        assert_eq!(h.store.items().await[0].metadata[META_EXTERNAL_STOCK], serde_json::json!(7));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_and_handles_are_stable() {
        let erp = FakeErp::with_products(vec![
            ExternalRecord::new(1, "Mouse").with_sku("M-1"),
            ExternalRecord::new(2, "Mouse").with_sku("M-2"),
            ExternalRecord::new(3, "Cable"),
        ]);
        let h = Harness::new(erp);
        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        let snapshot = |items: Vec<CatalogItem>| {
            let mut pairs: Vec<_> = items.into_iter().map(|i| (i.external_id(), i.id, i.handle.as_str().to_string())).collect();
            pairs.sort();
            pairs
        };
        let before = snapshot(h.store.items().await);

        let again = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!(again.created, 0);
        assert_eq!(again.failed, 0);
        let after = snapshot(h.store.items().await);
        assert_eq!(before, after);
        let handles: Vec<_> = after.iter().map(|(_, _, handle)| handle.as_str()).collect();
        assert_eq!(handles, vec!["mouse", "mouse-1", "cable"]);
        assert_eq!(h.store.ledger_len().await, 3);
    }

    #[tokio::test]
    async fn test_concurrent_workers_never_share_a_handle() {
        let products = (1..=12).map(|i| ExternalRecord::new(i, "Widget").with_sku(format!("W-{i}"))).collect();
        let mut config = SyncConfig::default();
        config.concurrency = 4;
        config.page_size = 5;
        let h = Harness::with_config(FakeErp::with_products(products), config);

        let result = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!(result.created, 12);
        let mut handles: Vec<_> = h.store.items().await.iter().map(|i| i.handle.as_str().to_string()).collect();
        handles.sort();
        handles.dedup();
        assert_eq!(handles.len(), 12);
    }

    #[tokio::test]
    async fn test_handle_suffixes_follow_fetch_order_under_concurrency() {
        let erp = FakeErp::with_products(vec![
            ExternalRecord::new(1, "Widget").with_sku("W-1"),
            ExternalRecord::new(2, "Widget").with_sku("W-2"),
            ExternalRecord::new(3, "Widget 1").with_sku("W-3"),
            ExternalRecord::new(4, "Widget").with_sku("W-4"),
        ]);
        erp.update(|s| s.delay = Some(std::time::Duration::from_millis(5)));
        let mut config = SyncConfig::default();
        config.concurrency = 4;
        let h = Harness::with_config(erp, config);

        let result = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!((result.created, result.failed), (4, 0));
        let mut handles: Vec<_> = h.store.items().await.into_iter()
            .map(|i| (i.external_id().map(|id| id.value()), i.handle.as_str().to_string()))
            .collect();
        handles.sort();
        assert_eq!(handles, vec![
            (Some(1), "widget".to_string()),
            (Some(2), "widget-1".to_string()),
            (Some(3), "widget-1-1".to_string()),
            (Some(4), "widget-2".to_string()),
        ]);
    }

    #[tokio::test]
    async fn test_handle_taken_before_insert_gets_the_next_one() {
        let store = Arc::new(MemoryStore::new());
        let existing = ExternalRecord::new(1, "Widget").with_sku("W-1");
        let handle = IdentityResolver::base_handle(&existing);
        crate::store::CatalogRepository::insert_item(store.as_ref(), &CatalogItem::from_external(&existing, handle, Utc::now())).await.unwrap();
        let mut repos = Repositories::from_memory(store.clone());
        repos.catalog = Arc::new(StaleHandleCatalog::new(store.clone()));
        let erp = FakeErp::with_products(vec![ExternalRecord::new(2, "Widget").with_sku("W-2")]);
        let h = Harness::with_repos(erp, SyncConfig::default(), store, repos);

        let result = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!((result.created, result.failed), (1, 0));
        let created = crate::store::CatalogRepository::find_item_by_sku(h.store.as_ref(), "W-2").await.unwrap().unwrap();
        assert_eq!(created.handle.as_str(), "widget-1");
    }

    #[tokio::test]
    async fn test_title_toggle_protects_local_edits() {
        let erp = FakeErp::with_products(vec![ExternalRecord::new(7, "Lamp").with_sku("L-7").with_description("ERP text")]);
        let h = Harness::new(erp);
        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;

        let mut item = h.store.items().await.remove(0);
        item.description = Some("Hand written".into());
        crate::store::CatalogRepository::update_item(h.store.as_ref(), &item).await.unwrap();
        h.erp.update(|s| { s.products[0].name = "Desk Lamp".into(); s.products[0].description = Some("New ERP text".into()); });

        let request = RunRequest { sync_title: Some(false), ..Default::default() };
        h.catalog.run(&request, &CancellationToken::new()).await;
        let item = h.store.items().await.remove(0);
        assert_eq!(item.title, "Lamp");
        assert_eq!(item.description.as_deref(), Some("Hand written"));
        assert_eq!(item.handle.as_str(), "lamp");

        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!(h.store.items().await[0].title, "Desk Lamp");
    }

    #[tokio::test]
    async fn test_one_bad_record_does_not_stop_the_run() {
        let erp = FakeErp::with_products(vec![
            ExternalRecord::new(1, "Alpha").with_sku("A"),
            ExternalRecord::new(2, "Broken").with_sku("BAD"),
            ExternalRecord::new(3, "Gamma").with_sku("C"),
        ]);
        let store = Arc::new(MemoryStore::new());
        let mut repos = Repositories::from_memory(store.clone());
        repos.catalog = Arc::new(FailingCatalog::new(store.clone(), "BAD"));
        let h = Harness::with_repos(erp, SyncConfig::default(), store, repos);

        let result = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!((result.created, result.failed), (2, 1));
        assert!(!result.aborted);
        assert!(result.errors[0].contains("external_id 2"));
        assert_eq!(h.store.item_count().await, 2);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let erp = FakeErp::with_products(vec![ExternalRecord::new(1, "Alpha").with_sku("A"), ExternalRecord::new(2, "Old").inactive()]);
        let h = Harness::new(erp);
        let result = h.catalog.run(&RunRequest { dry_run: true, ..Default::default() }, &CancellationToken::new()).await;
        assert_eq!((result.created, result.skipped), (1, 1));
        assert_eq!(h.store.item_count().await, 0);
        assert_eq!(h.store.stock("A", "default").await, None);
        assert!(crate::store::SyncStateRepository::last_sync_at(h.store.as_ref(), SyncJob::Catalog).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_credentials_abort_before_any_write() {
        let erp = FakeErp::with_products(vec![ExternalRecord::new(1, "Alpha").with_sku("A")]);
        erp.update(|s| s.reject_auth = true);
        let h = Harness::new(erp);
        let result = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert!(result.aborted);
        assert!(result.errors[0].contains("could not authenticate"));
        assert_eq!(h.store.item_count().await, 0);
    }

    #[tokio::test]
    async fn test_page_failure_keeps_earlier_pages() {
        let products = (1..=5).map(|i| ExternalRecord::new(i, format!("P{i}")).with_sku(format!("P-{i}"))).collect();
        let erp = FakeErp::with_products(products);
        erp.update(|s| s.fail_fetch_at_offset = Some(2));
        let mut config = SyncConfig::default();
        config.page_size = 2;
        let h = Harness::with_config(erp, config);

        let result = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert!(result.aborted);
        assert_eq!(result.created, 2);
        assert_eq!(h.store.item_count().await, 2);
    }

    #[tokio::test]
    async fn test_deactivation_unpublishes_and_zeroes_stock() {
        let erp = FakeErp::with_products(vec![ExternalRecord::new(9, "Chair").with_sku("CH").with_stock(4), ExternalRecord::new(10, "Ghost").inactive()]);
        let h = Harness::new(erp);
        let first = h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert_eq!((first.created, first.skipped), (1, 1));

        h.erp.update(|s| s.products[0].active = false);
        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        let item = h.store.items().await.remove(0);
        assert_eq!(item.status, ItemStatus::Draft);
        assert_eq!(h.store.stock("CH", "default").await, Some(0));

        h.erp.update(|s| s.products[0].active = true);
        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert!(h.store.items().await[0].is_published());
        assert_eq!(h.store.stock("CH", "default").await, Some(4));
    }

    #[tokio::test]
    async fn test_limit_and_cancellation() {
        let products = (1..=6).map(|i| ExternalRecord::new(i, format!("P{i}"))).collect();
        let h = Harness::new(FakeErp::with_products(products));
        let limited = h.catalog.run(&RunRequest { limit: Some(4), ..Default::default() }, &CancellationToken::new()).await;
        assert_eq!(limited.created, 4);
        assert_eq!(limited.fetched_total, Some(6));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let cancelled = h.catalog.run(&RunRequest::default(), &cancel).await;
        assert!(cancelled.cancelled);
        assert_eq!(cancelled.processed(), 0);
        assert_eq!(h.store.item_count().await, 4);
    }

    #[tokio::test]
    async fn test_images_are_imported_when_enabled() {
        let mut record = ExternalRecord::new(5, "Poster").with_sku("PO");
        record.raw_image = Some(BASE64.encode([0x89, b'P', b'N', b'G', 1, 2, 3]));
        let mut config = SyncConfig::default();
        config.import_images = true;
        let store = Arc::new(MemoryStore::new());
        let media = Arc::new(MemoryMediaStore::default());
        let repos = Repositories::from_memory(store.clone()).with_media(media.clone());
        let h = Harness::with_repos(FakeErp::with_products(vec![record]), config, store, repos);

        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        let item = h.store.items().await.remove(0);
        assert_eq!(item.thumbnail.as_deref(), Some("memory://poster-5"));
        assert!(media.get("poster-5").await.is_some());
    }

    #[tokio::test]
    async fn test_incremental_run_only_sees_modified_products() {
        let old = ExternalRecord { modified_at: Some(Utc::now() - chrono::Duration::days(2)), ..ExternalRecord::new(1, "Old").with_sku("O") };
        let h = Harness::new(FakeErp::with_products(vec![old]));
        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;

        let fresh = ExternalRecord { modified_at: Some(Utc::now() + chrono::Duration::minutes(1)), ..ExternalRecord::new(2, "Fresh").with_sku("F") };
        h.erp.update(|s| s.products.push(fresh));
        let result = h.catalog.run(&RunRequest { incremental: Some(true), ..Default::default() }, &CancellationToken::new()).await;
        assert_eq!(result.fetched_total, Some(1));
        assert_eq!((result.created, result.updated), (1, 0));
    }

    #[tokio::test]
    async fn test_incremental_window_tolerates_a_lagging_erp_clock() {
        let h = Harness::new(FakeErp::default());
        let first = h.catalog.run(&RunRequest { incremental: Some(true), ..Default::default() }, &CancellationToken::new()).await;
        assert!(!first.aborted);

        let lagging = ExternalRecord { modified_at: Some(Utc::now() - chrono::Duration::minutes(1)), ..ExternalRecord::new(8, "Stool").with_sku("ST") };
        h.erp.update(|s| s.products.push(lagging));
        let second = h.catalog.run(&RunRequest { incremental: Some(true), ..Default::default() }, &CancellationToken::new()).await;
        assert_eq!(second.created, 1);
    }

    #[tokio::test]
    async fn test_limited_run_keeps_the_previous_window() {
        let products = (1..=3).map(|i| ExternalRecord::new(i, format!("P{i}"))).collect();
        let h = Harness::new(FakeErp::with_products(products));
        h.catalog.run(&RunRequest { limit: Some(2), ..Default::default() }, &CancellationToken::new()).await;
        let state = h.store.as_ref();
        assert!(crate::store::SyncStateRepository::last_sync_at(state, SyncJob::Catalog).await.unwrap().is_none());

        h.catalog.run(&RunRequest::default(), &CancellationToken::new()).await;
        assert!(crate::store::SyncStateRepository::last_sync_at(state, SyncJob::Catalog).await.unwrap().is_some());
    }
}
