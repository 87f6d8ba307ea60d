//! Maps ERP records onto catalog items.
//!
//! Resolution order: the sync ledger, then an exact SKU match (the synthesised
//! `EXT-<id>` SKU when the record carries none). The first step that matches
//! is authoritative. Neither step consults the handle; handles are only
//! allocated for new items.

use tracing::debug;

use crate::domain::aggregates::CatalogItem;
use crate::domain::{ExternalRecord, Handle};
use crate::error::{Result, SyncError};
use crate::store::{Repositories, StoreError};

/// Upper bound on `-<n>` suffixes tried before giving up on a handle.
const MAX_HANDLE_SUFFIX: u32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchSource { Ledger, Sku }

#[derive(Clone, Debug)]
pub enum Resolution {
    Linked { item: CatalogItem, via: MatchSource },
    Unlinked,
}

impl Resolution {
    pub fn is_linked(&self) -> bool { matches!(self, Self::Linked { .. }) }
}

#[derive(Clone)]
pub struct IdentityResolver {
    repos: Repositories,
}

impl IdentityResolver {
    pub fn new(repos: Repositories) -> Self { Self { repos } }

    pub async fn resolve(&self, record: &ExternalRecord) -> Result<Resolution> {
        if let Some(entry) = self.repos.ledger.find(record.external_id).await? {
            let item = self.repos.catalog.find_item(entry.catalog_item_id).await?.ok_or_else(|| {
                SyncError::NotFound(format!("catalog item {} linked to external id {}", entry.catalog_item_id, record.external_id))
            })?;
            return Ok(Resolution::Linked { item, via: MatchSource::Ledger });
        }

        let sku = record.effective_sku();
        if let Some(item) = self.repos.catalog.find_item_by_sku(sku.as_str()).await? {
            if let Some(other) = item.external_id().filter(|id| *id != record.external_id) {
                return Err(StoreError::Conflict(format!(
                    "sku '{sku}' belongs to catalog item {} linked to external id {other}", item.id
                )).into());
            }
            debug!(external_id = %record.external_id, sku = %sku, item_id = %item.id, "Matched catalog item by sku");
            return Ok(Resolution::Linked { item, via: MatchSource::Sku });
        }

        Ok(Resolution::Unlinked)
    }

    /// First free handle for a new item: the slug of its name, then `-1`, `-2`, ...
    ///
    /// Callers hold [`KeyedLocks::handles_key`](crate::sync::locks::KeyedLocks::handles_key) while allocating and inserting.
    pub async fn allocate_handle(&self, record: &ExternalRecord) -> Result<Handle> {
        let base = Self::base_handle(record);
        if !self.repos.catalog.handle_taken(base.as_str()).await? {
            return Ok(base);
        }
        for n in 1..=MAX_HANDLE_SUFFIX {
            let candidate = base.with_suffix(n);
            if !self.repos.catalog.handle_taken(candidate.as_str()).await? {
                return Ok(candidate);
            }
        }
        Err(SyncError::Internal(format!("no free handle for '{base}'")))
    }

    pub fn base_handle(record: &ExternalRecord) -> Handle {
        Handle::slugify(&record.name).unwrap_or_else(|| Handle::for_external(record.external_id))
    }
}
