use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Version of the typed field sets below. Bumped when a field changes meaning.
pub const STAGING_SCHEMA_VERSION: u16 = 1;

/// Family of staged records. Each family has its own landing table and
/// warehouse transform function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Order,
    LineItem,
    Transaction,
    Payout,
    AdInsight,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Order => "order",
            RecordKind::LineItem => "line_item",
            RecordKind::Transaction => "transaction",
            RecordKind::Payout => "payout",
            RecordKind::AdInsight => "ad_insight",
        }
    }

    pub fn staging_table(&self) -> &'static str {
        match self {
            RecordKind::Order => "stg_shopify_orders",
            RecordKind::LineItem => "stg_shopify_line_items",
            RecordKind::Transaction => "stg_shopify_transactions",
            RecordKind::Payout => "stg_shopify_payouts",
            RecordKind::AdInsight => "stg_meta_insights",
        }
    }

    /// Warehouse function promoting staged rows; takes the shop id, returns a row count.
    pub fn transform_function(&self) -> &'static str {
        match self {
            RecordKind::Order => "transform_shopify_orders",
            RecordKind::LineItem => "transform_shopify_line_items",
            RecordKind::Transaction => "transform_shopify_transactions",
            RecordKind::Payout => "transform_shopify_payouts",
            RecordKind::AdInsight => "transform_meta_insights",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedOrder {
    pub order_id: String,
    pub name: String,
    pub email: Option<String>,
    pub currency: String,
    pub total_price: Decimal,
    pub subtotal_price: Option<Decimal>,
    pub total_tax: Option<Decimal>,
    pub total_discounts: Option<Decimal>,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedLineItem {
    pub line_item_id: String,
    pub order_id: String,
    pub title: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub unit_price: Option<Decimal>,
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedTransaction {
    pub transaction_id: String,
    pub order_id: String,
    pub kind: String,
    pub status: String,
    pub gateway: Option<String>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedPayout {
    pub payout_id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

/// Named conversion columns promoted out of the ads `actions` arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionField {
    Purchases,
    Leads,
    AddToCart,
    InitiateCheckout,
    CompleteRegistration,
    LandingPageViews,
    LinkClicks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetrics {
    pub purchases: Decimal,
    pub purchase_value: Decimal,
    pub leads: Decimal,
    pub add_to_cart: Decimal,
    pub add_to_cart_value: Decimal,
    pub initiate_checkout: Decimal,
    pub complete_registration: Decimal,
    pub landing_page_views: Decimal,
    pub link_clicks: Decimal,
}

impl ConversionMetrics {
    pub fn add_count(&mut self, field: ConversionField, value: Decimal) {
        *self.count_mut(field) += value;
    }

    /// Monetary value for the field, when the warehouse keeps one.
    pub fn add_value(&mut self, field: ConversionField, value: Decimal) {
        match field {
            ConversionField::Purchases => self.purchase_value += value,
            ConversionField::AddToCart => self.add_to_cart_value += value,
            _ => {}
        }
    }

    fn count_mut(&mut self, field: ConversionField) -> &mut Decimal {
        match field {
            ConversionField::Purchases => &mut self.purchases,
            ConversionField::Leads => &mut self.leads,
            ConversionField::AddToCart => &mut self.add_to_cart,
            ConversionField::InitiateCheckout => &mut self.initiate_checkout,
            ConversionField::CompleteRegistration => &mut self.complete_registration,
            ConversionField::LandingPageViews => &mut self.landing_page_views,
            ConversionField::LinkClicks => &mut self.link_clicks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedInsight {
    pub level: String,
    /// Breakdown name (`none`, `demographic`, `device`, `geo`).
    pub breakdown: String,
    pub entity_id: String,
    pub entity_name: Option<String>,
    pub campaign_id: Option<String>,
    pub adset_id: Option<String>,
    pub ad_id: Option<String>,
    pub date_start: NaiveDate,
    pub date_stop: NaiveDate,
    /// Breakdown dimension values, e.g. `{"age": "25-34", "gender": "female"}`.
    pub breakdown_values: BTreeMap<String, String>,
    pub spend: Decimal,
    pub impressions: i64,
    pub clicks: i64,
    pub reach: Option<i64>,
    pub conversions: ConversionMetrics,
    pub raw: serde_json::Value,
}

/// Typed staging payload, tagged by record family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagedPayload {
    Order(StagedOrder),
    LineItem(StagedLineItem),
    Transaction(StagedTransaction),
    Payout(StagedPayout),
    AdInsight(StagedInsight),
}

impl StagedPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            StagedPayload::Order(_) => RecordKind::Order,
            StagedPayload::LineItem(_) => RecordKind::LineItem,
            StagedPayload::Transaction(_) => RecordKind::Transaction,
            StagedPayload::Payout(_) => RecordKind::Payout,
            StagedPayload::AdInsight(_) => RecordKind::AdInsight,
        }
    }

    /// Full source payload, including fields without a typed column.
    pub fn raw(&self) -> &serde_json::Value {
        match self {
            StagedPayload::Order(r) => &r.raw,
            StagedPayload::LineItem(r) => &r.raw,
            StagedPayload::Transaction(r) => &r.raw,
            StagedPayload::Payout(r) => &r.raw,
            StagedPayload::AdInsight(r) => &r.raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    /// Platform entity key; staging upserts on (shop_id, natural_id).
    pub natural_id: String,
    pub received_at: DateTime<Utc>,
    pub schema_version: u16,
    pub payload: StagedPayload,
}

impl StagedRecord {
    pub fn new(natural_id: impl Into<String>, payload: StagedPayload) -> Self {
        Self {
            natural_id: natural_id.into(),
            received_at: Utc::now(),
            schema_version: STAGING_SCHEMA_VERSION,
            payload,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn payout() -> StagedPayload {
        StagedPayload::Payout(StagedPayout {
            payout_id: "gid://shopify/ShopifyPaymentsPayout/1".into(),
            status: "PAID".into(),
            amount: Decimal::from_str("120.50").unwrap(),
            currency: "USD".into(),
            issued_at: None,
            raw: json!({ "id": "gid://shopify/ShopifyPaymentsPayout/1", "extra": 1 }),
        })
    }

    #[test]
    fn payload_is_tagged_by_kind() {
        let value = serde_json::to_value(payout()).unwrap();
        assert_eq!(value["kind"], "payout");
        assert_eq!(value["amount"], "120.50");
    }

    #[test]
    fn raw_side_channel_keeps_unknown_fields() {
        assert_eq!(payout().raw()["extra"], 1);
    }

    #[test]
    fn record_kind_names_are_distinct() {
        let kinds = [
            RecordKind::Order,
            RecordKind::LineItem,
            RecordKind::Transaction,
            RecordKind::Payout,
            RecordKind::AdInsight,
        ];
        let tables: std::collections::HashSet<_> =
            kinds.iter().map(|k| k.staging_table()).collect();
        let functions: std::collections::HashSet<_> =
            kinds.iter().map(|k| k.transform_function()).collect();
        assert_eq!(tables.len(), kinds.len());
        assert_eq!(functions.len(), kinds.len());
    }

    #[test]
    fn conversion_values_only_for_monetary_fields() {
        let mut m = ConversionMetrics::default();
        m.add_count(ConversionField::Purchases, Decimal::from(2));
        m.add_value(ConversionField::Purchases, Decimal::from_str("59.90").unwrap());
        m.add_value(ConversionField::Leads, Decimal::from(10));
        assert_eq!(m.purchases, Decimal::from(2));
        assert_eq!(m.purchase_value, Decimal::from_str("59.90").unwrap());
        assert_eq!(m.leads, Decimal::ZERO);
    }

    #[test]
    fn new_record_carries_schema_version() {
        let record = StagedRecord::new("p-1", payout());
        assert_eq!(record.schema_version, STAGING_SCHEMA_VERSION);
        assert_eq!(record.kind(), RecordKind::Payout);
    }
}
