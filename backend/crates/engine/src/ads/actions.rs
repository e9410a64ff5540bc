use std::collections::HashSet;

use serde_json::Value;

use super::models::ActionValue;
use shopsync_db::staging::models::{ConversionField, ConversionMetrics};

/// Recognized action types and the column each feeds. When several types
/// for the same column are present in a row, the earliest entry wins so a
/// pixel purchase reported under three names is counted once.
pub const ACTION_FIELD_MAP: &[(&str, ConversionField)] = &[
    ("omni_purchase", ConversionField::Purchases),
    ("purchase", ConversionField::Purchases),
    ("offsite_conversion.fb_pixel_purchase", ConversionField::Purchases),
    ("lead", ConversionField::Leads),
    ("offsite_conversion.fb_pixel_lead", ConversionField::Leads),
    ("add_to_cart", ConversionField::AddToCart),
    ("offsite_conversion.fb_pixel_add_to_cart", ConversionField::AddToCart),
    ("initiate_checkout", ConversionField::InitiateCheckout),
    (
        "offsite_conversion.fb_pixel_initiate_checkout",
        ConversionField::InitiateCheckout,
    ),
    ("complete_registration", ConversionField::CompleteRegistration),
    ("landing_page_view", ConversionField::LandingPageViews),
    ("link_click", ConversionField::LinkClicks),
];

fn parse_actions(row: &Value, key: &str) -> Vec<ActionValue> {
    row.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn lookup<'a>(actions: &'a [ActionValue], action_type: &str) -> Option<&'a ActionValue> {
    actions.iter().find(|a| a.action_type == action_type)
}

/// Named conversion metrics from a row's `actions` and `action_values`.
/// Unrecognized action types are left in the raw payload only.
pub fn conversions_from_row(row: &Value) -> ConversionMetrics {
    let actions = parse_actions(row, "actions");
    let values = parse_actions(row, "action_values");
    let mut metrics = ConversionMetrics::default();

    let mut counted: HashSet<ConversionField> = HashSet::new();
    let mut valued: HashSet<ConversionField> = HashSet::new();
    for (action_type, field) in ACTION_FIELD_MAP {
        if !counted.contains(field) {
            if let Some(amount) = lookup(&actions, action_type).and_then(ActionValue::amount) {
                metrics.add_count(*field, amount);
                counted.insert(*field);
            }
        }
        if !valued.contains(field) {
            if let Some(amount) = lookup(&values, action_type).and_then(ActionValue::amount) {
                metrics.add_value(*field, amount);
                valued.insert(*field);
            }
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn recognized_actions_fill_named_columns() {
        let row = json!({
            "actions": [
                { "action_type": "lead", "value": "4" },
                { "action_type": "add_to_cart", "value": "11" },
                { "action_type": "link_click", "value": "250" },
                { "action_type": "video_view", "value": "900" }
            ],
            "action_values": [
                { "action_type": "add_to_cart", "value": "310.50" }
            ]
        });
        let m = conversions_from_row(&row);
        assert_eq!(m.leads, dec!(4));
        assert_eq!(m.add_to_cart, dec!(11));
        assert_eq!(m.add_to_cart_value, dec!(310.50));
        assert_eq!(m.link_clicks, dec!(250));
        assert_eq!(m.purchases, Decimal::ZERO);
    }

    #[test]
    fn purchase_aliases_are_not_double_counted() {
        let row = json!({
            "actions": [
                { "action_type": "offsite_conversion.fb_pixel_purchase", "value": "3" },
                { "action_type": "purchase", "value": "3" },
                { "action_type": "omni_purchase", "value": "3" }
            ],
            "action_values": [
                { "action_type": "purchase", "value": "89.97" },
                { "action_type": "offsite_conversion.fb_pixel_purchase", "value": "89.97" }
            ]
        });
        let m = conversions_from_row(&row);
        assert_eq!(m.purchases, dec!(3));
        assert_eq!(m.purchase_value, dec!(89.97));
    }

    #[test]
    fn fallback_alias_is_used_when_preferred_is_absent() {
        let row = json!({
            "actions": [{ "action_type": "offsite_conversion.fb_pixel_lead", "value": 7 }]
        });
        assert_eq!(conversions_from_row(&row).leads, dec!(7));
    }

    #[test]
    fn rows_without_actions_have_zero_conversions() {
        assert_eq!(conversions_from_row(&json!({})), ConversionMetrics::default());
    }
}
