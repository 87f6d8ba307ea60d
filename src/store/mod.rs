//! Repositories over the local catalog store.
//!
//! One trait per entity. Reconcilers and webhooks only see these traits; the
//! storage engine behind them is either Postgres ([`postgres::PgStore`]) or
//! the in-process [`memory::MemoryStore`].

pub mod media;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{CatalogItem, InventoryRecord, LedgerEventType, Order, SyncLedgerEntry};
use crate::domain::{ExternalId, Quantity, SyncJob, SyncRunResult};

pub use media::{FsMediaStore, MediaStore};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Other(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_item(&self, id: Uuid) -> StoreResult<Option<CatalogItem>>;
    /// The item owning a variant with exactly this SKU.
    async fn find_item_by_sku(&self, sku: &str) -> StoreResult<Option<CatalogItem>>;
    async fn handle_taken(&self, handle: &str) -> StoreResult<bool>;
    /// Insert an item and its variants. Duplicate handles or SKUs are conflicts.
    async fn insert_item(&self, item: &CatalogItem) -> StoreResult<()>;
    /// Persist title, description, status, metadata and thumbnail. The handle never changes.
    async fn update_item(&self, item: &CatalogItem) -> StoreResult<()>;
    async fn attach_sales_channel(&self, item_id: Uuid, channel_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn find(&self, sku: &str, location_id: &str) -> StoreResult<Option<InventoryRecord>>;
    async fn insert(&self, record: &InventoryRecord) -> StoreResult<()>;
    async fn set_quantity(&self, id: Uuid, quantity: Quantity) -> StoreResult<()>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn find(&self, external_id: ExternalId) -> StoreResult<Option<SyncLedgerEntry>>;
    /// Create the mapping, or refresh it when it already points at the same item.
    /// A mapping to a different item is a [`StoreError::Conflict`].
    async fn link(&self, entry: &SyncLedgerEntry) -> StoreResult<()>;
    async fn touch(&self, external_id: ExternalId, event: LedgerEventType, at: DateTime<Utc>) -> StoreResult<()>;
    async fn list(&self, limit: usize, offset: usize) -> StoreResult<Vec<SyncLedgerEntry>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> StoreResult<()>;
    async fn find(&self, id: Uuid) -> StoreResult<Option<Order>>;
    async fn find_by_erp_order_id(&self, erp_order_id: &str) -> StoreResult<Option<Order>>;
    /// Merge keys into the order's metadata; `null` removes a key. Status is untouched.
    async fn merge_metadata(&self, id: Uuid, patch: Map<String, Value>) -> StoreResult<Order>;
}

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn last_sync_at(&self, job: SyncJob) -> StoreResult<Option<DateTime<Utc>>>;
    async fn set_last_sync_at(&self, job: SyncJob, at: DateTime<Utc>) -> StoreResult<()>;
    async fn record_run(&self, run: &SyncRunResult) -> StoreResult<()>;
    async fn last_run(&self, job: SyncJob) -> StoreResult<Option<SyncRunResult>>;
}

/// Handles to every repository, cloned into each component.
#[derive(Clone)]
pub struct Repositories {
    pub catalog: Arc<dyn CatalogRepository>,
    pub inventory: Arc<dyn InventoryRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub state: Arc<dyn SyncStateRepository>,
    pub media: Option<Arc<dyn MediaStore>>,
}

impl Repositories {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            catalog: store.clone(), inventory: store.clone(), ledger: store.clone(),
            orders: store.clone(), state: store, media: None,
        }
    }

    pub fn in_memory() -> Self { Self::from_memory(Arc::new(MemoryStore::default())) }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            catalog: store.clone(), inventory: store.clone(), ledger: store.clone(),
            orders: store.clone(), state: store, media: None,
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaStore>) -> Self {
        self.media = Some(media);
        self
    }
}
