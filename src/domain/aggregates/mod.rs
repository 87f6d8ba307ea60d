//! Aggregates module
pub mod catalog_item;
pub mod inventory;
pub mod ledger;
pub mod order;

pub use catalog_item::{CatalogItem, ItemStatus, Variant};
pub use inventory::{AdjustmentMode, AdjustmentStatus, InventoryAdjustment, InventoryRecord, PerItemResult};
pub use ledger::{LedgerEventType, SyncLedgerEntry};
pub use order::{Address, LineItem, Order, OrderError, OrderStatus};
