use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopsync_common::Platform;

/// API credential a shop has stored for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopCredential {
    pub shop_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Platform-specific settings, e.g. `{"ad_account_id": "act_123"}`.
    pub metadata: serde_json::Value,
}

impl ShopCredential {
    pub fn has_token(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Ads account id without the `act_` prefix.
    pub fn ad_account_id(&self) -> Option<&str> {
        self.metadata_str("ad_account_id")
            .map(|id| id.strip_prefix("act_").unwrap_or(id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: String,
    /// Store domain, e.g. `acme.myshopify.com`.
    pub domain: String,
    pub currency: Option<String>,
    pub metadata: serde_json::Value,
}
