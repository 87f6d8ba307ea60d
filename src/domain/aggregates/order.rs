//! Order Aggregate
//!
//! The local order is the system of record for the customer-facing
//! transaction. Synchronisation only ever annotates its metadata.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub email: String,
    pub status: OrderStatus,
    pub currency: String,
    pub items: Vec<LineItem>,
    pub shipping_address: Option<Address>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)] pub struct LineItem { pub id: Uuid, pub title: String, pub sku: Option<String>, pub quantity: u32, pub unit_price: Decimal }
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)] pub struct Address { pub first_name: Option<String>, pub last_name: Option<String>, pub company: Option<String>, pub address1: Option<String>, pub address2: Option<String>, pub city: Option<String>, pub postal_code: Option<String>, pub country_code: Option<String>, pub phone: Option<String> }
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] #[serde(rename_all = "snake_case")] pub enum OrderStatus { #[default] Pending, Placed, Completed, Cancelled, Archived }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Placed => "placed", Self::Completed => "completed", Self::Cancelled => "cancelled", Self::Archived => "archived" }
    }
    pub fn parse(s: &str) -> Self {
        match s { "placed" => Self::Placed, "completed" => Self::Completed, "cancelled" => Self::Cancelled, "archived" => Self::Archived, _ => Self::Pending }
    }
}

impl Address {
    pub fn full_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter().flatten().map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
        if name.is_empty() { None } else { Some(name) }
    }
}

impl Order {
    pub fn create(order_number: impl Into<String>, email: impl Into<String>, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_number: order_number.into(), email: email.into(), status: OrderStatus::Pending,
            currency: currency.to_string(), items: vec![], shipping_address: None, metadata: Map::new(),
            created_at: now, updated_at: now,
        }
    }

    pub fn add_item(&mut self, title: impl Into<String>, sku: Option<&str>, quantity: u32, unit_price: Decimal) {
        self.items.push(LineItem { id: Uuid::now_v7(), title: title.into(), sku: sku.map(str::to_string), quantity, unit_price });
        self.touch();
    }

    pub fn place(&mut self) -> Result<(), OrderError> {
        if self.items.is_empty() { return Err(OrderError::NoItems); }
        if self.status != OrderStatus::Pending { return Err(OrderError::NotPending); }
        self.status = OrderStatus::Placed;
        self.touch();
        Ok(())
    }

    pub fn is_placed(&self) -> bool { self.status == OrderStatus::Placed }

    /// Merge keys into metadata. `Null` values remove the key. Never touches `status`.
    pub fn merge_metadata(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            if value.is_null() { self.metadata.remove(&key); } else { self.metadata.insert(key, value); }
        }
        self.touch();
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> { self.metadata.get(key).and_then(Value::as_str) }

    pub fn total(&self) -> Decimal { self.items.iter().map(|i| i.unit_price * Decimal::from(i.quantity)).sum() }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems, NotPending }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::NoItems => write!(f, "No items"), Self::NotPending => write!(f, "Order is not pending") }
    }
}
