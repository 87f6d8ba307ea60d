//! Catalog Item Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::domain::external::ExternalRecord;
use crate::domain::value_objects::{ExternalId, Handle, Sku};

pub const META_EXTERNAL_ID: &str = "external_id";
pub const META_EXTERNAL_SKU: &str = "external_sku";
pub const META_EXTERNAL_CATEGORY: &str = "external_category";
pub const META_EXTERNAL_BARCODE: &str = "external_barcode";
pub const META_EXTERNAL_STOCK: &str = "external_stock";
pub const META_SYNCED_AT: &str = "synced_at";
pub const META_LAST_SYNCED_AT: &str = "last_synced_at";
/// Set when the item was unpublished because the ERP deactivated it.
pub const META_DEACTIVATED_BY_SYNC: &str = "erp_deactivated";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus { #[default] Draft, Published }

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Draft => "draft", Self::Published => "published" }
    }
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("published") { Self::Published } else { Self::Draft }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub item_id: Uuid,
    pub sku: Sku,
    pub title: String,
    pub metadata: Map<String, Value>,
}

impl Variant {
    pub fn external_id(&self) -> Option<ExternalId> { read_external_id(&self.metadata) }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub handle: Handle,
    pub title: String,
    pub description: Option<String>,
    pub status: ItemStatus,
    pub metadata: Map<String, Value>,
    pub variants: Vec<Variant>,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Build a new, linked item with its default variant from an ERP record.
    pub fn from_external(record: &ExternalRecord, handle: Handle, at: DateTime<Utc>) -> Self {
        let id = Uuid::now_v7();
        let sku = record.effective_sku();
        let mut variant_meta = Map::new();
        variant_meta.insert(META_EXTERNAL_ID.into(), json!(record.external_id.value()));
        let variant = Variant { id: Uuid::now_v7(), item_id: id, sku, title: "Default".into(), metadata: variant_meta };
        let status = if record.active { ItemStatus::Published } else { ItemStatus::Draft };
        let mut item = Self {
            id, handle, title: record.name.clone(), description: record.description.clone(), status,
            metadata: Map::new(), variants: vec![variant], thumbnail: None, created_at: at, updated_at: at,
        };
        item.link_external(record, Some(record.stock_quantity), at);
        item
    }

    pub fn external_id(&self) -> Option<ExternalId> { read_external_id(&self.metadata) }
    pub fn default_variant(&self) -> Option<&Variant> { self.variants.first() }
    pub fn is_published(&self) -> bool { self.status == ItemStatus::Published }

    /// Record the ERP identity and descriptive references on the item.
    /// `external_stock` is `None` when the source carried no stock figure.
    pub fn link_external(&mut self, record: &ExternalRecord, external_stock: Option<i64>, at: DateTime<Utc>) {
        self.metadata.insert(META_EXTERNAL_ID.into(), json!(record.external_id.value()));
        match record.declared_sku() {
            Some(sku) => { self.metadata.insert(META_EXTERNAL_SKU.into(), json!(sku)); }
            None => { self.metadata.remove(META_EXTERNAL_SKU); }
        }
        if let Some(category) = &record.category_ref { self.metadata.insert(META_EXTERNAL_CATEGORY.into(), json!(category)); }
        if let Some(barcode) = &record.barcode { self.metadata.insert(META_EXTERNAL_BARCODE.into(), json!(barcode)); }
        self.refresh_sync_metadata(external_stock, at);
    }

    /// Informational cache fields; refreshed on every reconciliation.
    pub fn refresh_sync_metadata(&mut self, external_stock: Option<i64>, at: DateTime<Utc>) {
        if let Some(stock) = external_stock { self.metadata.insert(META_EXTERNAL_STOCK.into(), json!(stock)); }
        self.metadata.insert(META_SYNCED_AT.into(), json!(at.to_rfc3339()));
        self.metadata.insert(META_LAST_SYNCED_AT.into(), json!(at.to_rfc3339()));
        self.touch(at);
    }

    pub fn set_title(&mut self, title: &str) -> bool {
        if self.title == title { return false; }
        self.title = title.to_string();
        true
    }

    pub fn set_description(&mut self, description: Option<&str>) -> bool {
        if self.description.as_deref() == description { return false; }
        self.description = description.map(str::to_string);
        true
    }

    pub fn publish(&mut self) { self.status = ItemStatus::Published; }
    pub fn deactivate(&mut self) { self.status = ItemStatus::Draft; }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.get(META_LAST_SYNCED_AT).and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.with_timezone(&Utc))
    }

    fn touch(&mut self, at: DateTime<Utc>) { self.updated_at = at; }
}

fn read_external_id(metadata: &Map<String, Value>) -> Option<ExternalId> {
    match metadata.get(META_EXTERNAL_ID)? {
        Value::Number(n) => n.as_i64().map(ExternalId::new),
        Value::String(s) => s.parse::<i64>().ok().map(ExternalId::new),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_external_links_item_and_variant() {
        let record = ExternalRecord::new(501, "Wireless Mouse").with_sku("X-1").with_stock(12);
        let now = Utc::now();
        let item = CatalogItem::from_external(&record, Handle::slugify(&record.name).unwrap(), now);
        assert_eq!(item.handle.as_str(), "wireless-mouse");
        assert_eq!(item.external_id(), Some(ExternalId::new(501)));
        assert_eq!(item.metadata[META_EXTERNAL_STOCK], json!(12));
        assert_eq!(item.default_variant().unwrap().sku.as_str(), "X-1");
        assert_eq!(item.default_variant().unwrap().external_id(), Some(ExternalId::new(501)));
        assert!(item.is_published());
        assert_eq!(item.last_synced_at().map(|t| t.timestamp()), Some(now.timestamp()));
    }

    #[test]
    fn test_missing_sku_uses_fallback_and_drops_external_sku() {
        let record = ExternalRecord::new(77, "Cable");
        let item = CatalogItem::from_external(&record, Handle::for_external(record.external_id), Utc::now());
        assert_eq!(item.default_variant().unwrap().sku.as_str(), "EXT-77");
        assert!(!item.metadata.contains_key(META_EXTERNAL_SKU));
    }

    #[test]
    fn test_external_id_accepts_string_metadata() {
        let mut item = CatalogItem::from_external(&ExternalRecord::new(1, "A"), Handle::for_external(ExternalId::new(1)), Utc::now());
        item.metadata.insert(META_EXTERNAL_ID.into(), json!("42"));
        assert_eq!(item.external_id(), Some(ExternalId::new(42)));
    }
}
