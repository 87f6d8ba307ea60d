//! Domain model shared by the reconcilers, webhooks and stores.
pub mod aggregates;
pub mod events;
pub mod external;
pub mod run;
pub mod value_objects;

pub use external::{ExternalRecord, PartnerInfo, SalesOrderDraft, SalesOrderLine};
pub use run::{RecordOutcome, RunMode, SyncJob, SyncRunResult};
pub use value_objects::{ExternalId, Handle, Quantity, Sku};
