use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::actions::conversions_from_row;
use shopsync_db::staging::models::StagedInsight;

/// Fields requested for every insights call.
pub const INSIGHT_FIELDS: &str = "account_id,account_name,campaign_id,campaign_name,\
adset_id,adset_name,ad_id,ad_name,date_start,date_stop,spend,impressions,clicks,reach,\
actions,action_values";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Account,
    Campaign,
    Adset,
    Ad,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Account, Level::Campaign, Level::Adset, Level::Ad];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Account => "account",
            Level::Campaign => "campaign",
            Level::Adset => "adset",
            Level::Ad => "ad",
        }
    }

    fn id_field(&self) -> &'static str {
        match self {
            Level::Account => "account_id",
            Level::Campaign => "campaign_id",
            Level::Adset => "adset_id",
            Level::Ad => "ad_id",
        }
    }

    fn name_field(&self) -> &'static str {
        match self {
            Level::Account => "account_name",
            Level::Campaign => "campaign_name",
            Level::Adset => "adset_name",
            Level::Ad => "ad_name",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Breakdown {
    None,
    Demographic,
    Device,
    Geo,
}

impl Breakdown {
    pub const ALL: [Breakdown; 4] = [
        Breakdown::None,
        Breakdown::Demographic,
        Breakdown::Device,
        Breakdown::Geo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Breakdown::None => "none",
            Breakdown::Demographic => "demographic",
            Breakdown::Device => "device",
            Breakdown::Geo => "geo",
        }
    }

    /// Row keys carrying the breakdown values.
    pub fn dimensions(&self) -> &'static [&'static str] {
        match self {
            Breakdown::None => &[],
            Breakdown::Demographic => &["age", "gender"],
            Breakdown::Device => &["device_platform"],
            Breakdown::Geo => &["country"],
        }
    }

    /// Value of the `breakdowns` request parameter.
    pub fn api_param(&self) -> Option<String> {
        match self {
            Breakdown::None => None,
            other => Some(other.dimensions().join(",")),
        }
    }
}

impl fmt::Display for Breakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightsPage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl InsightsPage {
    pub fn next_url(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_deref())
            .filter(|n| !n.is_empty())
    }
}

/// One entry of an `actions` / `action_values` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionValue {
    pub action_type: String,
    pub value: Value,
}

impl ActionValue {
    pub fn amount(&self) -> Option<Decimal> {
        decimal_of(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InsightRowError {
    #[error("missing field {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

/// Meta sends numbers as strings; accept either.
fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn str_field<'a>(row: &'a Value, field: &str) -> Option<&'a str> {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn date_field(row: &Value, field: &'static str) -> Result<NaiveDate, InsightRowError> {
    let raw = str_field(row, field).ok_or(InsightRowError::Missing(field))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| InsightRowError::Invalid {
        field,
        value: raw.to_string(),
    })
}

fn decimal_field(row: &Value, field: &'static str) -> Result<Option<Decimal>, InsightRowError> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => decimal_of(v).map(Some).ok_or_else(|| InsightRowError::Invalid {
            field,
            value: v.to_string(),
        }),
    }
}

fn count_field(row: &Value, field: &'static str) -> Result<Option<i64>, InsightRowError> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| InsightRowError::Invalid {
            field,
            value: n.to_string(),
        }),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
            InsightRowError::Invalid {
                field,
                value: s.clone(),
            }
        }),
        Some(other) => Err(InsightRowError::Invalid {
            field,
            value: other.to_string(),
        }),
    }
}

/// Convert one insights row fetched at `level` with `breakdown`.
pub fn to_staged_insight(
    row: &Value,
    level: Level,
    breakdown: Breakdown,
) -> Result<StagedInsight, InsightRowError> {
    let entity_id = str_field(row, level.id_field())
        .ok_or(InsightRowError::Missing(level.id_field()))?
        .to_string();

    let mut breakdown_values = BTreeMap::new();
    for dim in breakdown.dimensions() {
        let value = str_field(row, dim).ok_or(InsightRowError::Missing(dim))?;
        breakdown_values.insert((*dim).to_string(), value.to_string());
    }

    Ok(StagedInsight {
        level: level.as_str().to_string(),
        breakdown: breakdown.as_str().to_string(),
        entity_id,
        entity_name: str_field(row, level.name_field()).map(str::to_string),
        campaign_id: str_field(row, "campaign_id").map(str::to_string),
        adset_id: str_field(row, "adset_id").map(str::to_string),
        ad_id: str_field(row, "ad_id").map(str::to_string),
        date_start: date_field(row, "date_start")?,
        date_stop: date_field(row, "date_stop")?,
        breakdown_values,
        spend: decimal_field(row, "spend")?.unwrap_or(Decimal::ZERO),
        impressions: count_field(row, "impressions")?.unwrap_or(0),
        clicks: count_field(row, "clicks")?.unwrap_or(0),
        reach: count_field(row, "reach")?,
        conversions: conversions_from_row(row),
        raw: row.clone(),
    })
}

/// Staging key: one row per level, breakdown, entity, date range and breakdown values.
pub fn insight_natural_id(insight: &StagedInsight) -> String {
    let values: Vec<String> = insight
        .breakdown_values
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!(
        "{}|{}|{}|{}|{}|{}",
        insight.level,
        insight.breakdown,
        insight.entity_id,
        insight.date_start,
        insight.date_stop,
        values.join(",")
    )
}
