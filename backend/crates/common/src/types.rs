use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ShopsyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub instance_id: Uuid,
}

impl ServiceInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            instance_id: Uuid::new_v4(),
        }
    }
}

/// External platform a shop has connected.
///
/// Stored and serialized in upper case (`"SHOPIFY"`, `"META"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    /// Commerce platform: orders, line items, transactions, payouts.
    Shopify,
    /// Ads platform: insights metrics.
    Meta,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Shopify, Platform::Meta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Shopify => "SHOPIFY",
            Platform::Meta => "META",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ShopsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHOPIFY" => Ok(Platform::Shopify),
            "META" => Ok(Platform::Meta),
            other => Err(ShopsyncError::Validation(format!("unknown platform: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for p in Platform::ALL {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
    }

    #[test]
    fn platform_parse_is_case_insensitive() {
        assert_eq!("meta".parse::<Platform>().unwrap(), Platform::Meta);
        assert_eq!(" Shopify ".parse::<Platform>().unwrap(), Platform::Shopify);
    }

    #[test]
    fn platform_parse_rejects_unknown() {
        let err = "tiktok".parse::<Platform>().unwrap_err();
        assert!(err.to_string().contains("unknown platform"), "got: {err}");
    }

    #[test]
    fn platform_serializes_upper_case() {
        let json = serde_json::to_string(&Platform::Shopify).unwrap();
        assert_eq!(json, "\"SHOPIFY\"");
        let p: Platform = serde_json::from_str("\"META\"").unwrap();
        assert_eq!(p, Platform::Meta);
    }
}
