//! Environment configuration.

use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SyncError;
use crate::sync::scheduler::Cadence;

/// Upper bound on per-run worker concurrency.
pub const MAX_CONCURRENCY: usize = 8;

/// ERP connection settings. Credentials are never serialised.
#[derive(Clone, Debug, Serialize)]
pub struct ErpConfig {
    pub base_url: String,
    pub database: String,
    #[serde(skip)]
    pub username: String,
    #[serde(skip)]
    pub password: String,
    pub timeout_secs: u64,
}

impl ErpConfig {
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

/// Which catalog fields the reconciler may overwrite on linked items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FieldToggles {
    pub title: bool,
    pub description: bool,
}

impl FieldToggles {
    /// Apply per-run overrides on top of the process-wide toggles.
    pub fn with_overrides(self, title: Option<bool>, description: Option<bool>) -> Self {
        Self { title: title.unwrap_or(self.title), description: description.unwrap_or(self.description) }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SyncConfig {
    pub erp: ErpConfig,
    pub fields: FieldToggles,
    pub sync_stock: bool,
    pub import_images: bool,
    pub incremental: bool,
    pub page_size: usize,
    pub concurrency: usize,
    pub catalog_cadence: Cadence,
    pub inventory_cadence: Cadence,
    pub default_location: String,
    pub default_sales_channel: String,
    pub auto_confirm_orders: bool,
    pub create_missing_inventory: bool,
    pub media_dir: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            erp: ErpConfig {
                base_url: "http://localhost:8069".into(), database: String::new(), username: String::new(),
                password: String::new(), timeout_secs: 30,
            },
            fields: FieldToggles { title: true, description: false },
            sync_stock: true,
            import_images: false,
            incremental: false,
            page_size: 100,
            concurrency: 1,
            catalog_cadence: Cadence::every(Duration::from_secs(600)),
            inventory_cadence: Cadence::every(Duration::from_secs(300)),
            default_location: "default".into(),
            default_sales_channel: "default".into(),
            auto_confirm_orders: true,
            create_missing_inventory: true,
            media_dir: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let d = Self::default();
        let erp = ErpConfig {
            base_url: get("ERP_URL").unwrap_or(d.erp.base_url).trim_end_matches('/').to_string(),
            database: get("ERP_DATABASE").unwrap_or(d.erp.database),
            username: get("ERP_USERNAME").unwrap_or(d.erp.username),
            password: get("ERP_PASSWORD").unwrap_or(d.erp.password),
            timeout_secs: parse_or(&get, "ERP_TIMEOUT_SECS", d.erp.timeout_secs)?,
        };
        let fields = FieldToggles {
            title: parse_bool_or(&get, "SYNC_TITLE", d.fields.title)?,
            description: parse_bool_or(&get, "SYNC_DESCRIPTION", d.fields.description)?,
        };
        let catalog_cadence = match get("CATALOG_CADENCE") { Some(s) => Cadence::from_str(&s)?, None => d.catalog_cadence };
        let inventory_cadence = match get("INVENTORY_CADENCE") { Some(s) => Cadence::from_str(&s)?, None => d.inventory_cadence };
        let page_size: usize = parse_or(&get, "SYNC_PAGE_SIZE", d.page_size)?;
        let concurrency: usize = parse_or(&get, "SYNC_CONCURRENCY", d.concurrency)?;

        Ok(Self {
            erp,
            fields,
            sync_stock: parse_bool_or(&get, "SYNC_STOCK", d.sync_stock)?,
            import_images: parse_bool_or(&get, "SYNC_IMAGES", d.import_images)?,
            incremental: parse_bool_or(&get, "SYNC_INCREMENTAL", d.incremental)?,
            page_size: page_size.max(1),
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
            catalog_cadence,
            inventory_cadence,
            default_location: get("DEFAULT_LOCATION").unwrap_or(d.default_location),
            default_sales_channel: get("DEFAULT_SALES_CHANNEL").unwrap_or(d.default_sales_channel),
            auto_confirm_orders: parse_bool_or(&get, "ORDER_AUTO_CONFIRM", d.auto_confirm_orders)?,
            create_missing_inventory: parse_bool_or(&get, "INVENTORY_CREATE_MISSING", d.create_missing_inventory)?,
            media_dir: get("MEDIA_DIR").filter(|s| !s.trim().is_empty()),
        })
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, SyncError> {
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| SyncError::Config(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

fn parse_bool_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, SyncError> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(SyncError::Config(format!("{key} must be a boolean, got '{v}'"))),
    }
}
