use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use shopsync_db::staging::models::{
    StagedLineItem, StagedOrder, StagedPayout, StagedTransaction,
};

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    pub message: String,
}

impl UserError {
    /// `message`, prefixed with the input path Shopify blames when it names one.
    pub fn describe(&self) -> String {
        match self.field.as_deref() {
            Some(path) if !path.is_empty() => format!("{}: {}", path.join("."), self.message),
            _ => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkOperationStatus {
    Created,
    Running,
    Completed,
    Canceling,
    Canceled,
    Failed,
    Expired,
}

impl fmt::Display for BulkOperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BulkOperationStatus::Created => "CREATED",
            BulkOperationStatus::Running => "RUNNING",
            BulkOperationStatus::Completed => "COMPLETED",
            BulkOperationStatus::Canceling => "CANCELING",
            BulkOperationStatus::Canceled => "CANCELED",
            BulkOperationStatus::Failed => "FAILED",
            BulkOperationStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperation {
    pub id: String,
    pub status: BulkOperationStatus,
    #[serde(default)]
    pub error_code: Option<String>,
    /// Shopify sends UnsignedInt64 as a string.
    #[serde(default, deserialize_with = "count_from_str_or_number")]
    pub object_count: u64,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRunPayload {
    pub bulk_operation: Option<BulkOperation>,
    #[serde(default)]
    pub user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRunData {
    pub bulk_operation_run_query: BulkRunPayload,
}

#[derive(Debug, Deserialize)]
pub struct NodeData {
    pub node: Option<BulkOperation>,
}

fn count_from_str_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("objectCount is not an unsigned integer")),
        Some(Value::String(s)) => s.trim().parse().map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected objectCount: {other}"
        ))),
    }
}

/// Entity type encoded in a Shopify global id (`gid://shopify/Order/123` → `Order`).
pub fn gid_type(gid: &str) -> Option<&str> {
    gid.strip_prefix("gid://shopify/")?.split('/').next()
}

/// Why a single bulk line could not be converted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("missing field {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoneyV2 {
    amount: Option<String>,
    currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoneyBag {
    shop_money: Option<MoneyV2>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderNode {
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    currency_code: Option<String>,
    total_price_set: Option<MoneyBag>,
    subtotal_price_set: Option<MoneyBag>,
    total_tax_set: Option<MoneyBag>,
    total_discounts_set: Option<MoneyBag>,
    display_financial_status: Option<String>,
    display_fulfillment_status: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    processed_at: Option<String>,
    cancelled_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineItemNode {
    id: Option<String>,
    #[serde(rename = "__parentId")]
    parent_id: Option<String>,
    title: Option<String>,
    sku: Option<String>,
    quantity: Option<i64>,
    original_unit_price_set: Option<MoneyBag>,
    product: Option<IdRef>,
    variant: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionNode {
    id: Option<String>,
    #[serde(rename = "__parentId")]
    parent_id: Option<String>,
    kind: Option<String>,
    status: Option<String>,
    gateway: Option<String>,
    processed_at: Option<String>,
    amount_set: Option<MoneyBag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayoutNode {
    id: Option<String>,
    status: Option<String>,
    issued_at: Option<String>,
    net: Option<MoneyV2>,
}

fn decode<T: for<'de> Deserialize<'de>>(line: &Value) -> Result<T, RecordError> {
    T::deserialize(line).map_err(|e| RecordError::Invalid {
        field: "line",
        value: e.to_string(),
    })
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, RecordError> {
    value.ok_or(RecordError::Missing(field))
}

fn parse_money(value: &str, field: &'static str) -> Result<Decimal, RecordError> {
    Decimal::from_str(value.trim()).map_err(|_| RecordError::Invalid {
        field,
        value: value.to_string(),
    })
}

fn money(bag: Option<&MoneyBag>, field: &'static str) -> Result<Option<Decimal>, RecordError> {
    match bag
        .and_then(|b| b.shop_money.as_ref())
        .and_then(|m| m.amount.as_deref())
    {
        Some(amount) => parse_money(amount, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_time(value: &str, field: &'static str) -> Result<DateTime<Utc>, RecordError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RecordError::Invalid {
            field,
            value: value.to_string(),
        })
}

fn optional_time(
    value: Option<&str>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, RecordError> {
    value.map(|v| parse_time(v, field)).transpose()
}

/// `updatedAt` of an order line, read without validating anything else.
pub fn order_updated_at(line: &Value) -> Option<DateTime<Utc>> {
    line.get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|v| parse_time(v, "updatedAt").ok())
}

pub fn to_staged_order(line: &Value) -> Result<StagedOrder, RecordError> {
    let node: OrderNode = decode(line)?;
    let total_price = money(node.total_price_set.as_ref(), "totalPriceSet")?
        .ok_or(RecordError::Missing("totalPriceSet"))?;
    let currency = node
        .currency_code
        .or_else(|| {
            node.total_price_set
                .as_ref()
                .and_then(|b| b.shop_money.as_ref())
                .and_then(|m| m.currency_code.clone())
        })
        .ok_or(RecordError::Missing("currencyCode"))?;

    Ok(StagedOrder {
        order_id: required(node.id, "id")?,
        name: required(node.name, "name")?,
        email: node.email,
        currency,
        total_price,
        subtotal_price: money(node.subtotal_price_set.as_ref(), "subtotalPriceSet")?,
        total_tax: money(node.total_tax_set.as_ref(), "totalTaxSet")?,
        total_discounts: money(node.total_discounts_set.as_ref(), "totalDiscountsSet")?,
        financial_status: node.display_financial_status,
        fulfillment_status: node.display_fulfillment_status,
        created_at: parse_time(&required(node.created_at, "createdAt")?, "createdAt")?,
        updated_at: parse_time(&required(node.updated_at, "updatedAt")?, "updatedAt")?,
        processed_at: optional_time(node.processed_at.as_deref(), "processedAt")?,
        cancelled_at: optional_time(node.cancelled_at.as_deref(), "cancelledAt")?,
        raw: line.clone(),
    })
}

pub fn to_staged_line_item(line: &Value) -> Result<StagedLineItem, RecordError> {
    let node: LineItemNode = decode(line)?;
    Ok(StagedLineItem {
        line_item_id: required(node.id, "id")?,
        order_id: required(node.parent_id, "__parentId")?,
        title: required(node.title, "title")?,
        sku: node.sku.filter(|s| !s.is_empty()),
        quantity: required(node.quantity, "quantity")?,
        unit_price: money(node.original_unit_price_set.as_ref(), "originalUnitPriceSet")?,
        product_id: node.product.and_then(|p| p.id),
        variant_id: node.variant.and_then(|v| v.id),
        raw: line.clone(),
    })
}

/// Converts a transaction line. `order_id` fills in the parent when the
/// transaction came inline in its order rather than as its own line.
pub fn to_staged_transaction(
    line: &Value,
    order_id: Option<&str>,
) -> Result<StagedTransaction, RecordError> {
    let node: TransactionNode = decode(line)?;
    let amount = node
        .amount_set
        .as_ref()
        .and_then(|b| b.shop_money.as_ref());
    Ok(StagedTransaction {
        transaction_id: required(node.id, "id")?,
        order_id: required(
            node.parent_id.or_else(|| order_id.map(str::to_string)),
            "__parentId",
        )?,
        kind: required(node.kind, "kind")?,
        status: required(node.status, "status")?,
        gateway: node.gateway,
        amount: parse_money(
            required(amount.and_then(|m| m.amount.as_deref()), "amountSet")?,
            "amountSet",
        )?,
        currency: amount.and_then(|m| m.currency_code.clone()),
        processed_at: optional_time(node.processed_at.as_deref(), "processedAt")?,
        raw: line.clone(),
    })
}

pub fn to_staged_payout(line: &Value) -> Result<StagedPayout, RecordError> {
    let node: PayoutNode = decode(line)?;
    let net = required(node.net, "net")?;
    Ok(StagedPayout {
        payout_id: required(node.id, "id")?,
        status: required(node.status, "status")?,
        amount: parse_money(&required(net.amount, "net.amount")?, "net.amount")?,
        currency: required(net.currency_code, "net.currencyCode")?,
        issued_at: optional_time(node.issued_at.as_deref(), "issuedAt")?,
        raw: line.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn order_line() -> Value {
        json!({
            "id": "gid://shopify/Order/1001",
            "name": "#1001",
            "email": "buyer@example.com",
            "currencyCode": "USD",
            "totalPriceSet": { "shopMoney": { "amount": "129.90", "currencyCode": "USD" } },
            "totalTaxSet": { "shopMoney": { "amount": "9.90", "currencyCode": "USD" } },
            "displayFinancialStatus": "PAID",
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-02T08:30:00Z",
            "tags": ["vip"]
        })
    }

    #[test]
    fn bulk_operation_accepts_string_object_count() {
        let op: BulkOperation = serde_json::from_value(json!({
            "id": "gid://shopify/BulkOperation/1",
            "status": "COMPLETED",
            "objectCount": "42",
            "url": null
        }))
        .unwrap();
        assert_eq!(op.object_count, 42);
        assert_eq!(op.status, BulkOperationStatus::Completed);
    }

    #[test]
    fn gid_type_extracts_entity() {
        assert_eq!(gid_type("gid://shopify/LineItem/7"), Some("LineItem"));
        assert_eq!(gid_type("gid://shopify/OrderTransaction/7"), Some("OrderTransaction"));
        assert_eq!(gid_type("not-a-gid"), None);
    }

    #[test]
    fn order_line_converts_with_money_and_raw() {
        let order = to_staged_order(&order_line()).unwrap();
        assert_eq!(order.total_price, dec!(129.90));
        assert_eq!(order.total_tax, Some(dec!(9.90)));
        assert_eq!(order.subtotal_price, None);
        assert_eq!(order.raw["tags"][0], "vip");
    }

    #[test]
    fn order_without_total_is_a_record_error() {
        let mut line = order_line();
        line.as_object_mut().unwrap().remove("totalPriceSet");
        assert_eq!(
            to_staged_order(&line).unwrap_err(),
            RecordError::Missing("totalPriceSet")
        );
    }

    #[test]
    fn updated_at_is_readable_from_invalid_orders() {
        let line = json!({ "id": "gid://shopify/Order/1", "updatedAt": "2024-05-03T00:00:00Z" });
        assert!(to_staged_order(&line).is_err());
        assert_eq!(
            order_updated_at(&line).unwrap().to_rfc3339(),
            "2024-05-03T00:00:00+00:00"
        );
    }

    #[test]
    fn inline_transaction_takes_order_id() {
        let tx = to_staged_transaction(
            &json!({
                "id": "gid://shopify/OrderTransaction/9",
                "kind": "SALE",
                "status": "SUCCESS",
                "amountSet": { "shopMoney": { "amount": "10.00", "currencyCode": "EUR" } }
            }),
            Some("gid://shopify/Order/1"),
        )
        .unwrap();
        assert_eq!(tx.order_id, "gid://shopify/Order/1");
        assert_eq!(tx.amount, dec!(10.00));
        assert_eq!(tx.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn payout_with_bad_amount_is_invalid() {
        let err = to_staged_payout(&json!({
            "id": "gid://shopify/ShopifyPaymentsPayout/3",
            "status": "PAID",
            "net": { "amount": "twelve", "currencyCode": "USD" }
        }))
        .unwrap_err();
        assert!(matches!(err, RecordError::Invalid { field: "net.amount", .. }));
    }
}
