//! Shared fixtures for the unit tests: a scripted ERP and a wired-up service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::AppState;
use crate::config::SyncConfig;
use crate::domain::aggregates::CatalogItem;
use crate::domain::{ExternalId, ExternalRecord, PartnerInfo, SalesOrderDraft};
use crate::erp::{ErpError, ErpGateway, ErpResult, ProductQuery, SessionToken};
use crate::publisher::EventPublisher;
use crate::store::{CatalogRepository, MemoryStore, Repositories, StoreError, StoreResult};
use crate::sync::catalog::CatalogReconciler;
use crate::sync::inventory::InventoryReconciler;
use crate::sync::locks::KeyedLocks;
use crate::sync::orders::OrderPropagator;
use crate::sync::scheduler::SyncJobs;
use crate::webhooks::WebhookIngestor;

#[derive(Default)]
pub struct FakeState {
    pub products: Vec<ExternalRecord>,
    pub reject_auth: bool,
    pub fail_fetch_at_offset: Option<usize>,
    pub partners: HashMap<String, i64>,
    pub created_partners: Vec<PartnerInfo>,
    pub sales_orders: Vec<SalesOrderDraft>,
    pub confirmed: Vec<i64>,
    pub fail_sales_order: Option<ErpError>,
    pub fail_confirm: bool,
    /// Latency added to every call.
    pub delay: Option<Duration>,
    next_id: i64,
}

impl FakeState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn visible(&self, since: Option<DateTime<Utc>>) -> Vec<ExternalRecord> {
        let mut products: Vec<_> = self.products.iter()
            .filter(|p| match since {
                Some(since) => p.modified_at.is_some_and(|m| m > since),
                None => true,
            })
            .cloned().collect();
        products.sort_by_key(|p| p.external_id);
        products
    }
}

/// In-process ERP driven by a [`FakeState`] script.
#[derive(Default)]
pub struct FakeErp {
    state: Mutex<FakeState>,
}

impl FakeErp {
    pub fn with_products(products: Vec<ExternalRecord>) -> Self {
        let erp = Self::default();
        erp.update(|s| s.products = products);
        erp
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) { f(&mut self.state()) }

    pub fn state(&self) -> MutexGuard<'_, FakeState> { self.state.lock().unwrap() }

    async fn pause(&self) {
        let delay = self.state().delay;
        if let Some(delay) = delay { tokio::time::sleep(delay).await; }
    }
}

#[async_trait]
impl ErpGateway for FakeErp {
    async fn authenticate(&self) -> ErpResult<SessionToken> {
        self.pause().await;
        if self.state().reject_auth { return Err(ErpError::Auth("invalid credentials".into())); }
        Ok(SessionToken { uid: 2, authenticated_at: Utc::now() })
    }

    async fn fetch_products(&self, query: &ProductQuery) -> ErpResult<Vec<ExternalRecord>> {
        self.pause().await;
        let state = self.state();
        if state.fail_fetch_at_offset == Some(query.offset) {
            return Err(ErpError::Transport(format!("connection reset at offset {}", query.offset)));
        }
        Ok(state.visible(query.since).into_iter().skip(query.offset).take(query.limit)
            .map(|mut p| { if !query.include_images { p.raw_image = None; } p })
            .collect())
    }

    async fn fetch_product_count(&self, since: Option<DateTime<Utc>>) -> ErpResult<u64> {
        self.pause().await;
        Ok(self.state().visible(since).len() as u64)
    }

    async fn fetch_stock(&self, ids: &[ExternalId]) -> ErpResult<Vec<(ExternalId, i64)>> {
        self.pause().await;
        let state = self.state();
        Ok(state.products.iter().filter(|p| ids.contains(&p.external_id)).map(|p| (p.external_id, p.stock_quantity)).collect())
    }

    async fn find_product_by_sku(&self, sku: &str) -> ErpResult<Option<ExternalId>> {
        self.pause().await;
        Ok(self.state().products.iter().find(|p| p.declared_sku() == Some(sku)).map(|p| p.external_id))
    }

    async fn find_partner_by_email(&self, email: &str) -> ErpResult<Option<i64>> {
        self.pause().await;
        Ok(self.state().partners.get(email).copied())
    }

    async fn create_partner(&self, info: &PartnerInfo) -> ErpResult<i64> {
        self.pause().await;
        let mut state = self.state();
        let id = state.next_id();
        state.partners.insert(info.email.clone(), id);
        state.created_partners.push(info.clone());
        Ok(id)
    }

    async fn create_sales_order(&self, draft: &SalesOrderDraft) -> ErpResult<i64> {
        self.pause().await;
        let mut state = self.state();
        if let Some(e) = state.fail_sales_order.clone() { return Err(e); }
        let id = state.next_id();
        state.sales_orders.push(draft.clone());
        Ok(id)
    }

    async fn confirm_sales_order(&self, order_id: i64) -> ErpResult<bool> {
        self.pause().await;
        let mut state = self.state();
        if state.fail_confirm { return Err(ErpError::remote(2, "order cannot be confirmed")); }
        state.confirmed.push(order_id);
        Ok(true)
    }
}

/// Catalog repository that refuses to insert one SKU.
pub struct FailingCatalog {
    inner: Arc<MemoryStore>,
    sku: String,
}

impl FailingCatalog {
    pub fn new(inner: Arc<MemoryStore>, sku: &str) -> Self { Self { inner, sku: sku.to_string() } }
}

#[async_trait]
impl CatalogRepository for FailingCatalog {
    async fn find_item(&self, id: Uuid) -> StoreResult<Option<CatalogItem>> { self.inner.find_item(id).await }
    async fn find_item_by_sku(&self, sku: &str) -> StoreResult<Option<CatalogItem>> { self.inner.find_item_by_sku(sku).await }
    async fn handle_taken(&self, handle: &str) -> StoreResult<bool> { self.inner.handle_taken(handle).await }

    async fn insert_item(&self, item: &CatalogItem) -> StoreResult<()> {
        if item.variants.iter().any(|v| v.sku.as_str() == self.sku) {
            return Err(StoreError::Other(format!("disk full while writing sku {}", self.sku)));
        }
        self.inner.insert_item(item).await
    }

    async fn update_item(&self, item: &CatalogItem) -> StoreResult<()> { self.inner.update_item(item).await }
    async fn attach_sales_channel(&self, item_id: Uuid, channel_id: &str) -> StoreResult<()> {
        self.inner.attach_sales_channel(item_id, channel_id).await
    }
}

/// Catalog repository whose first handle check misses an insert made elsewhere.
pub struct StaleHandleCatalog {
    inner: Arc<MemoryStore>,
    stale: AtomicBool,
}

impl StaleHandleCatalog {
    pub fn new(inner: Arc<MemoryStore>) -> Self { Self { inner, stale: AtomicBool::new(true) } }
}

#[async_trait]
impl CatalogRepository for StaleHandleCatalog {
    async fn find_item(&self, id: Uuid) -> StoreResult<Option<CatalogItem>> { self.inner.find_item(id).await }
    async fn find_item_by_sku(&self, sku: &str) -> StoreResult<Option<CatalogItem>> { self.inner.find_item_by_sku(sku).await }

    async fn handle_taken(&self, handle: &str) -> StoreResult<bool> {
        if self.stale.swap(false, Ordering::SeqCst) { return Ok(false); }
        self.inner.handle_taken(handle).await
    }

    async fn insert_item(&self, item: &CatalogItem) -> StoreResult<()> { self.inner.insert_item(item).await }
    async fn update_item(&self, item: &CatalogItem) -> StoreResult<()> { self.inner.update_item(item).await }
    async fn attach_sales_channel(&self, item_id: Uuid, channel_id: &str) -> StoreResult<()> {
        self.inner.attach_sales_channel(item_id, channel_id).await
    }
}

/// Every component wired over one [`MemoryStore`] and a [`FakeErp`].
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub erp: Arc<FakeErp>,
    pub repos: Repositories,
    pub config: Arc<SyncConfig>,
    pub locks: KeyedLocks,
    pub inventory: Arc<InventoryReconciler>,
    pub catalog: Arc<CatalogReconciler>,
    pub webhooks: Arc<WebhookIngestor>,
}

impl Harness {
    pub fn new(erp: FakeErp) -> Self { Self::with_config(erp, SyncConfig::default()) }

    pub fn with_config(erp: FakeErp, config: SyncConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::from_memory(store.clone());
        Self::with_repos(erp, config, store, repos)
    }

    pub fn with_repos(erp: FakeErp, config: SyncConfig, store: Arc<MemoryStore>, repos: Repositories) -> Self {
        let erp = Arc::new(erp);
        let config = Arc::new(config);
        let locks = KeyedLocks::new();
        let inventory = Arc::new(InventoryReconciler::new(
            erp.clone(), repos.clone(), locks.clone(), config.default_location.clone(),
            config.create_missing_inventory, config.page_size,
        ));
        let catalog = Arc::new(CatalogReconciler::new(erp.clone(), repos.clone(), inventory.clone(), locks.clone(), config.clone()));
        let webhooks = Arc::new(WebhookIngestor::new(
            catalog.clone(), inventory.clone(), repos.clone(), locks.clone(), EventPublisher::disabled(),
        ));
        Self { store, erp, repos, config, locks, inventory, catalog, webhooks }
    }

    /// HTTP state over this harness. Each call gets fresh single-flight guards.
    pub fn state(&self) -> AppState {
        let publisher = EventPublisher::disabled();
        AppState {
            config: self.config.clone(),
            repos: self.repos.clone(),
            jobs: SyncJobs::new(self.catalog.clone(), self.inventory.clone(), self.locks.clone(), publisher.clone(), CancellationToken::new()),
            webhooks: self.webhooks.clone(),
            propagator: Arc::new(OrderPropagator::new(
                self.erp.clone(), self.repos.clone(), self.locks.clone(), publisher, self.config.auto_confirm_orders,
            )),
        }
    }
}
