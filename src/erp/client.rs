//! JSON-RPC client for the ERP.
//!
//! Every call is `POST {base_url}/jsonrpc`. Authentication goes through the
//! `common` service; model calls go through `object.execute_kw` with the
//! cached user id.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ErpError, ErpGateway, ErpResult, ProductQuery, SessionToken};
use crate::config::ErpConfig;
use crate::domain::{ExternalId, ExternalRecord, PartnerInfo, SalesOrderDraft};

/// Immediate retries after a transport failure.
const TRANSPORT_RETRIES: u32 = 1;

const ERP_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const PRODUCT_MODEL: &str = "product.product";
const PARTNER_MODEL: &str = "res.partner";
const SALE_ORDER_MODEL: &str = "sale.order";

const PRODUCT_FIELDS: [&str; 10] = [
    "id", "default_code", "name", "description_sale", "list_price", "qty_available",
    "categ_id", "barcode", "active", "write_date",
];

pub struct ErpClient {
    http: Client,
    config: ErpConfig,
    session: RwLock<Option<SessionToken>>,
    next_id: AtomicU64,
}

impl ErpClient {
    pub fn new(config: ErpConfig) -> ErpResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| ErpError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config, session: RwLock::new(None), next_id: AtomicU64::new(1) })
    }

    fn endpoint(&self) -> String { format!("{}/jsonrpc", self.config.base_url) }

    /// Drop the cached session so the next call re-authenticates.
    pub async fn invalidate_session(&self) {
        *self.session.write().await = None;
    }

    /// One JSON-RPC call, retried immediately on transport failure.
    async fn rpc(&self, service: &str, method: &str, args: Value) -> ErpResult<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.rpc_once(service, method, &args).await {
                Err(e) if e.is_transient() && attempt <= TRANSPORT_RETRIES => {
                    warn!(service, method, attempt, error = %e, "ERP call failed, retrying");
                }
                other => return other,
            }
        }
    }

    async fn rpc_once(&self, service: &str, method: &str, args: &Value) -> ErpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": id,
        });
        debug!(service, method, id, "Sending ERP request");

        let response = self.http.post(self.endpoint()).json(&body).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ErpError::Auth(format!("HTTP {status}")));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ErpError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ErpError::remote(i64::from(status.as_u16()), text));
        }

        let payload: Value = response.json().await?;
        if let Some(error) = payload.get("error") {
            return Err(classify_fault(error));
        }
        payload.get("result").cloned().ok_or_else(|| ErpError::Transport("response has neither result nor error".into()))
    }

    async fn execute_kw(&self, model: &str, method: &str, args: Value, kwargs: Value) -> ErpResult<Value> {
        let session = self.authenticate().await?;
        let result = self.rpc("object", "execute_kw", json!([
            self.config.database, session.uid, self.config.password, model, method, args, kwargs,
        ])).await;
        if matches!(result, Err(ErpError::Auth(_))) {
            self.invalidate_session().await;
        }
        result
    }

    async fn search_ids(&self, model: &str, domain: Value, limit: usize) -> ErpResult<Vec<i64>> {
        let result = self.execute_kw(model, "search", json!([domain]), json!({ "limit": limit })).await?;
        Ok(result.as_array().map(|ids| ids.iter().filter_map(Value::as_i64).collect()).unwrap_or_default())
    }

    async fn find_country(&self, code: &str) -> ErpResult<Option<i64>> {
        Ok(self.search_ids("res.country", json!([["code", "=", code.to_ascii_uppercase()]]), 1).await?.into_iter().next())
    }
}

#[async_trait]
impl ErpGateway for ErpClient {
    async fn authenticate(&self) -> ErpResult<SessionToken> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        let mut guard = self.session.write().await;
        if let Some(session) = guard.clone() {
            return Ok(session);
        }
        let result = self.rpc("common", "authenticate", json!([
            self.config.database, self.config.username, self.config.password, {},
        ])).await?;
        let uid = result.as_i64().filter(|uid| *uid > 0)
            .ok_or_else(|| ErpError::Auth(format!("credentials rejected for database '{}'", self.config.database)))?;
        let session = SessionToken { uid, authenticated_at: Utc::now() };
        info!(uid, database = %self.config.database, "Authenticated with ERP");
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn fetch_products(&self, query: &ProductQuery) -> ErpResult<Vec<ExternalRecord>> {
        let mut fields: Vec<&str> = PRODUCT_FIELDS.to_vec();
        if query.include_images { fields.push("image_1920"); }
        let kwargs = json!({
            "fields": fields,
            "limit": query.limit,
            "offset": query.offset,
            "order": "id asc",
            "context": { "active_test": false },
        });
        let result = self.execute_kw(PRODUCT_MODEL, "search_read", json!([modified_since(query.since)]), kwargs).await?;
        let rows = result.as_array().ok_or_else(|| ErpError::Transport("search_read did not return a list".into()))?;
        rows.iter().map(parse_product).collect()
    }

    async fn fetch_product_count(&self, since: Option<DateTime<Utc>>) -> ErpResult<u64> {
        let result = self.execute_kw(PRODUCT_MODEL, "search_count", json!([modified_since(since)]),
            json!({ "context": { "active_test": false } })).await?;
        result.as_u64().ok_or_else(|| ErpError::Transport("search_count did not return a number".into()))
    }

    async fn fetch_stock(&self, ids: &[ExternalId]) -> ErpResult<Vec<(ExternalId, i64)>> {
        if ids.is_empty() { return Ok(vec![]); }
        let raw_ids: Vec<i64> = ids.iter().map(ExternalId::value).collect();
        let result = self.execute_kw(PRODUCT_MODEL, "search_read", json!([[["id", "in", raw_ids]]]),
            json!({ "fields": ["id", "qty_available"], "context": { "active_test": false } })).await?;
        Ok(result.as_array().map(|rows| rows.iter().filter_map(|row| {
            let id = row.get("id")?.as_i64()?;
            Some((ExternalId::new(id), quantity(row.get("qty_available"))))
        }).collect()).unwrap_or_default())
    }

    async fn find_product_by_sku(&self, sku: &str) -> ErpResult<Option<ExternalId>> {
        let ids = self.search_ids(PRODUCT_MODEL, json!([["default_code", "=", sku]]), 1).await?;
        Ok(ids.into_iter().next().map(ExternalId::new))
    }

    async fn find_partner_by_email(&self, email: &str) -> ErpResult<Option<i64>> {
        Ok(self.search_ids(PARTNER_MODEL, json!([["email", "=", email]]), 1).await?.into_iter().next())
    }

    async fn create_partner(&self, info: &PartnerInfo) -> ErpResult<i64> {
        let mut values = Map::new();
        values.insert("name".into(), json!(info.name));
        values.insert("email".into(), json!(info.email));
        values.insert("customer_rank".into(), json!(1));
        for (key, value) in [("phone", &info.phone), ("street", &info.street), ("street2", &info.street2), ("city", &info.city), ("zip", &info.zip)] {
            if let Some(v) = value { values.insert(key.into(), json!(v)); }
        }
        if let Some(code) = &info.country_code {
            match self.find_country(code).await {
                Ok(Some(country_id)) => { values.insert("country_id".into(), json!(country_id)); }
                Ok(None) => debug!(country = %code, "Country not known to ERP, partner created without it"),
                Err(e) => warn!(country = %code, error = %e, "Country lookup failed, partner created without it"),
            }
        }
        let result = self.execute_kw(PARTNER_MODEL, "create", json!([Value::Object(values)]), json!({})).await?;
        created_id(&result)
    }

    async fn create_sales_order(&self, draft: &SalesOrderDraft) -> ErpResult<i64> {
        let lines: Vec<Value> = draft.lines.iter().map(|line| {
            let values = match line.product_id {
                Some(product_id) => json!({
                    "product_id": product_id.value(),
                    "name": line.description,
                    "product_uom_qty": line.quantity,
                    "price_unit": decimal_to_f64(line.unit_price),
                }),
                None => json!({ "display_type": "line_note", "name": line.description }),
            };
            json!([0, 0, values])
        }).collect();
        let mut values = json!({
            "partner_id": draft.partner_id,
            "client_order_ref": draft.client_reference,
            "order_line": lines,
        });
        if let Some(note) = &draft.note { values["note"] = json!(note); }
        let result = self.execute_kw(SALE_ORDER_MODEL, "create", json!([values]), json!({})).await?;
        created_id(&result)
    }

    async fn confirm_sales_order(&self, order_id: i64) -> ErpResult<bool> {
        let result = self.execute_kw(SALE_ORDER_MODEL, "action_confirm", json!([[order_id]]), json!({})).await?;
        Ok(!matches!(result, Value::Bool(false)))
    }
}

fn modified_since(since: Option<DateTime<Utc>>) -> Value {
    match since {
        Some(at) => json!([["write_date", ">", at.format(ERP_DATETIME_FORMAT).to_string()]]),
        None => json!([]),
    }
}

fn classify_fault(error: &Value) -> ErpError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let data = error.get("data");
    let name = data.and_then(|d| d.get("name")).and_then(Value::as_str).unwrap_or_default();
    let message = data.and_then(|d| d.get("message")).and_then(Value::as_str)
        .or_else(|| error.get("message").and_then(Value::as_str))
        .unwrap_or("unknown ERP fault")
        .to_string();
    if name.contains("AccessDenied") || name.contains("SessionExpired") || code == 100 {
        ErpError::Auth(message)
    } else {
        ErpError::Remote { code, message }
    }
}

fn created_id(result: &Value) -> ErpResult<i64> {
    result.as_i64()
        .or_else(|| result.as_array().and_then(|a| a.first()).and_then(Value::as_i64))
        .ok_or_else(|| ErpError::Transport(format!("create returned no id: {result}")))
}

/// ERP text fields use `false` for "empty".
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn quantity(value: Option<&Value>) -> i64 {
    value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))).unwrap_or(0)
}

fn decimal_to_f64(value: Decimal) -> f64 { value.to_f64().unwrap_or_default() }

fn parse_product(row: &Value) -> ErpResult<ExternalRecord> {
    let id = row.get("id").and_then(Value::as_i64)
        .ok_or_else(|| ErpError::Transport(format!("product row without id: {row}")))?;
    let price = row.get("list_price").and_then(Value::as_f64).and_then(Decimal::from_f64).unwrap_or_default();
    let category_ref = match row.get("categ_id") {
        Some(Value::Array(pair)) => pair.get(1).and_then(Value::as_str).map(str::to_string),
        other => text(other),
    };
    let modified_at = text(row.get("write_date"))
        .and_then(|s| NaiveDateTime::parse_from_str(&s, ERP_DATETIME_FORMAT).ok())
        .map(|naive| naive.and_utc());
    Ok(ExternalRecord {
        external_id: ExternalId::new(id),
        sku: text(row.get("default_code")),
        name: text(row.get("name")).unwrap_or_default(),
        description: text(row.get("description_sale")),
        price,
        stock_quantity: quantity(row.get("qty_available")),
        category_ref,
        barcode: text(row.get("barcode")),
        active: row.get("active").and_then(Value::as_bool).unwrap_or(true),
        raw_image: text(row.get("image_1920")),
        modified_at,
    })
}
