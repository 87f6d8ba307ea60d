//! Postgres repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    CatalogRepository, InventoryRepository, LedgerRepository, OrderRepository, StoreError, StoreResult,
    SyncStateRepository,
};
use crate::domain::aggregates::{
    Address, CatalogItem, InventoryRecord, ItemStatus, LedgerEventType, LineItem, Order, OrderStatus, SyncLedgerEntry, Variant,
};
use crate::domain::{ExternalId, Handle, Quantity, Sku, SyncJob, SyncRunResult};

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    async fn load_variants(&self, item_id: Uuid) -> StoreResult<Vec<Variant>> {
        let rows = sqlx::query_as::<_, VariantRow>("SELECT * FROM catalog_variants WHERE item_id = $1 ORDER BY position, id")
            .bind(item_id).fetch_all(&self.pool).await?;
        rows.into_iter().map(VariantRow::into_variant).collect()
    }

    async fn hydrate(&self, row: Option<ItemRow>) -> StoreResult<Option<CatalogItem>> {
        match row {
            Some(row) => {
                let variants = self.load_variants(row.id).await?;
                Ok(Some(row.into_item(variants)))
            }
            None => Ok(None),
        }
    }
}

fn map_conflict(e: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => StoreError::Conflict(what()),
        _ => StoreError::Database(e),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value { Value::Object(map) => map, _ => Map::new() }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid, handle: String, title: String, description: Option<String>, status: String,
    metadata: Value, thumbnail: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl ItemRow {
    fn into_item(self, variants: Vec<Variant>) -> CatalogItem {
        CatalogItem {
            id: self.id, handle: Handle::from_stored(self.handle), title: self.title, description: self.description,
            status: ItemStatus::parse(&self.status), metadata: object(self.metadata), variants,
            thumbnail: self.thumbnail, created_at: self.created_at, updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow { id: Uuid, item_id: Uuid, sku: String, title: String, metadata: Value, #[allow(dead_code)] position: i32 }

impl VariantRow {
    fn into_variant(self) -> StoreResult<Variant> {
        let sku = Sku::new(self.sku).map_err(|e| StoreError::Other(format!("variant {}: {e}", self.id)))?;
        Ok(Variant { id: self.id, item_id: self.item_id, sku, title: self.title, metadata: object(self.metadata) })
    }
}

#[derive(sqlx::FromRow)]
struct InventoryRow { id: Uuid, sku: String, location_id: String, stocked_quantity: i64, updated_at: DateTime<Utc> }

impl From<InventoryRow> for InventoryRecord {
    fn from(r: InventoryRow) -> Self {
        Self { id: r.id, sku: r.sku, location_id: r.location_id, stocked_quantity: Quantity::new(r.stocked_quantity), updated_at: r.updated_at }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow { external_id: i64, catalog_item_id: Uuid, variant_id: Option<Uuid>, sku: Option<String>, last_synced_at: DateTime<Utc>, last_event_type: String }

impl From<LedgerRow> for SyncLedgerEntry {
    fn from(r: LedgerRow) -> Self {
        Self {
            external_id: ExternalId::new(r.external_id), catalog_item_id: r.catalog_item_id, variant_id: r.variant_id,
            sku: r.sku, last_synced_at: r.last_synced_at, last_event_type: LedgerEventType::parse(&r.last_event_type),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, email: String, status: String, currency: String,
    items: Json<Vec<LineItem>>, shipping_address: Option<Json<Address>>, metadata: Value,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(r: OrderRow) -> Self {
        Self {
            id: r.id, order_number: r.order_number, email: r.email, status: OrderStatus::parse(&r.status),
            currency: r.currency, items: r.items.0, shipping_address: r.shipping_address.map(|a| a.0),
            metadata: object(r.metadata), created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn find_item(&self, id: Uuid) -> StoreResult<Option<CatalogItem>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM catalog_items WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        self.hydrate(row).await
    }

    async fn find_item_by_sku(&self, sku: &str) -> StoreResult<Option<CatalogItem>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT i.* FROM catalog_items i JOIN catalog_variants v ON v.item_id = i.id WHERE v.sku = $1 LIMIT 1")
            .bind(sku).fetch_optional(&self.pool).await?;
        self.hydrate(row).await
    }

    async fn handle_taken(&self, handle: &str) -> StoreResult<bool> {
        let taken: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM catalog_items WHERE handle = $1)")
            .bind(handle).fetch_one(&self.pool).await?;
        Ok(taken.0)
    }

    async fn insert_item(&self, item: &CatalogItem) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO catalog_items (id, handle, title, description, status, metadata, thumbnail, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
            .bind(item.id).bind(item.handle.as_str()).bind(&item.title).bind(&item.description).bind(item.status.as_str())
            .bind(Value::Object(item.metadata.clone())).bind(&item.thumbnail).bind(item.created_at).bind(item.updated_at)
            .execute(&mut *tx).await.map_err(|e| map_conflict(e, || format!("handle '{}' already exists", item.handle)))?;
        for (position, v) in item.variants.iter().enumerate() {
            sqlx::query("INSERT INTO catalog_variants (id, item_id, sku, title, metadata, position) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(v.id).bind(item.id).bind(v.sku.as_str()).bind(&v.title).bind(Value::Object(v.metadata.clone())).bind(position as i32)
                .execute(&mut *tx).await.map_err(|e| map_conflict(e, || format!("sku '{}' already exists", v.sku)))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_item(&self, item: &CatalogItem) -> StoreResult<()> {
        let result = sqlx::query("UPDATE catalog_items SET title = $2, description = $3, status = $4, metadata = $5, thumbnail = $6, updated_at = $7 WHERE id = $1")
            .bind(item.id).bind(&item.title).bind(&item.description).bind(item.status.as_str())
            .bind(Value::Object(item.metadata.clone())).bind(&item.thumbnail).bind(item.updated_at)
            .execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(StoreError::NotFound(format!("catalog item {}", item.id))); }
        Ok(())
    }

    async fn attach_sales_channel(&self, item_id: Uuid, channel_id: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO catalog_item_channels (item_id, channel_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(item_id).bind(channel_id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryRepository for PgStore {
    async fn find(&self, sku: &str, location_id: &str) -> StoreResult<Option<InventoryRecord>> {
        let row = sqlx::query_as::<_, InventoryRow>("SELECT * FROM inventory_levels WHERE sku = $1 AND location_id = $2")
            .bind(sku).bind(location_id).fetch_optional(&self.pool).await?;
        Ok(row.map(Into::into))
    }

    async fn insert(&self, record: &InventoryRecord) -> StoreResult<()> {
        sqlx::query("INSERT INTO inventory_levels (id, sku, location_id, stocked_quantity, updated_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(record.id).bind(&record.sku).bind(&record.location_id).bind(record.stocked_quantity.value()).bind(record.updated_at)
            .execute(&self.pool).await
            .map_err(|e| map_conflict(e, || format!("inventory for '{}' at '{}' already exists", record.sku, record.location_id)))?;
        Ok(())
    }

    async fn set_quantity(&self, id: Uuid, quantity: Quantity) -> StoreResult<()> {
        let result = sqlx::query("UPDATE inventory_levels SET stocked_quantity = $2, updated_at = NOW() WHERE id = $1")
            .bind(id).bind(quantity.value()).execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(StoreError::NotFound(format!("inventory record {id}"))); }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn find(&self, external_id: ExternalId) -> StoreResult<Option<SyncLedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerRow>("SELECT * FROM sync_ledger WHERE external_id = $1")
            .bind(external_id.value()).fetch_optional(&self.pool).await?;
        Ok(row.map(Into::into))
    }

    async fn link(&self, entry: &SyncLedgerEntry) -> StoreResult<()> {
        let linked: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO sync_ledger (external_id, catalog_item_id, variant_id, sku, last_synced_at, last_event_type) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (external_id) DO UPDATE SET \
               last_synced_at = EXCLUDED.last_synced_at, last_event_type = EXCLUDED.last_event_type, \
               variant_id = COALESCE(EXCLUDED.variant_id, sync_ledger.variant_id), sku = COALESCE(EXCLUDED.sku, sync_ledger.sku) \
             WHERE sync_ledger.catalog_item_id = EXCLUDED.catalog_item_id \
             RETURNING external_id")
            .bind(entry.external_id.value()).bind(entry.catalog_item_id).bind(entry.variant_id).bind(&entry.sku)
            .bind(entry.last_synced_at).bind(entry.last_event_type.as_str())
            .fetch_optional(&self.pool).await?;
        match linked {
            Some(_) => Ok(()),
            None => Err(StoreError::Conflict(format!("external id {} is linked to another catalog item", entry.external_id))),
        }
    }

    async fn touch(&self, external_id: ExternalId, event: LedgerEventType, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sync_ledger SET last_synced_at = $2, last_event_type = $3 WHERE external_id = $1")
            .bind(external_id.value()).bind(at).bind(event.as_str()).execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(StoreError::NotFound(format!("ledger entry {external_id}"))); }
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> StoreResult<Vec<SyncLedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>("SELECT * FROM sync_ledger ORDER BY external_id LIMIT $1 OFFSET $2")
            .bind(limit as i64).bind(offset as i64).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        sqlx::query("INSERT INTO orders (id, order_number, email, status, currency, items, shipping_address, metadata, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
            .bind(order.id).bind(&order.order_number).bind(&order.email).bind(order.status.as_str()).bind(&order.currency)
            .bind(Json(&order.items)).bind(order.shipping_address.as_ref().map(Json)).bind(Value::Object(order.metadata.clone()))
            .bind(order.created_at).bind(order.updated_at)
            .execute(&self.pool).await.map_err(|e| map_conflict(e, || format!("order {} already exists", order.id)))?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Into::into))
    }

    async fn find_by_erp_order_id(&self, erp_order_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE metadata->>'erp_order_id' = $1 LIMIT 1")
            .bind(erp_order_id).fetch_optional(&self.pool).await?;
        Ok(row.map(Into::into))
    }

    async fn merge_metadata(&self, id: Uuid, patch: Map<String, Value>) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>("UPDATE orders SET metadata = jsonb_strip_nulls(metadata || $2), updated_at = NOW() WHERE id = $1 RETURNING *")
            .bind(id).bind(Value::Object(patch)).fetch_optional(&self.pool).await?;
        row.map(Into::into).ok_or_else(|| StoreError::NotFound(format!("order {id}")))
    }
}

#[async_trait]
impl SyncStateRepository for PgStore {
    async fn last_sync_at(&self, job: SyncJob) -> StoreResult<Option<DateTime<Utc>>> {
        let sql = match job {
            SyncJob::Catalog => "SELECT catalog_last_sync_at FROM sync_state WHERE id = 1",
            SyncJob::Inventory => "SELECT inventory_last_sync_at FROM sync_state WHERE id = 1",
        };
        let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(sql).fetch_optional(&self.pool).await?;
        Ok(row.and_then(|r| r.0))
    }

    async fn set_last_sync_at(&self, job: SyncJob, at: DateTime<Utc>) -> StoreResult<()> {
        let sql = match job {
            SyncJob::Catalog => "INSERT INTO sync_state (id, catalog_last_sync_at, updated_at) VALUES (1, $1, NOW()) ON CONFLICT (id) DO UPDATE SET catalog_last_sync_at = EXCLUDED.catalog_last_sync_at, updated_at = NOW()",
            SyncJob::Inventory => "INSERT INTO sync_state (id, inventory_last_sync_at, updated_at) VALUES (1, $1, NOW()) ON CONFLICT (id) DO UPDATE SET inventory_last_sync_at = EXCLUDED.inventory_last_sync_at, updated_at = NOW()",
        };
        sqlx::query(sql).bind(at).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_run(&self, run: &SyncRunResult) -> StoreResult<()> {
        sqlx::query("INSERT INTO sync_runs (run_id, job, mode, result, started_at, finished_at) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(run.run_id).bind(run.job.as_str()).bind(run.mode.as_str()).bind(Json(run))
            .bind(run.started_at).bind(run.finished_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn last_run(&self, job: SyncJob) -> StoreResult<Option<SyncRunResult>> {
        let row: Option<(Json<SyncRunResult>,)> = sqlx::query_as("SELECT result FROM sync_runs WHERE job = $1 ORDER BY started_at DESC LIMIT 1")
            .bind(job.as_str()).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.0 .0))
    }
}
