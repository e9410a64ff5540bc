use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::clock::Clock;
use shopsync_common::error::ShopsyncError;
use shopsync_common::Platform;
use shopsync_db::credentials::models::{Shop, ShopCredential};
use shopsync_db::credentials::repositories::CredentialSource;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no {platform} credential for shop {shop_id}")]
    NotFound { shop_id: String, platform: String },

    #[error("{platform} credential for shop {shop_id} expired at {expires_at}")]
    Expired {
        shop_id: String,
        platform: Platform,
        expires_at: DateTime<Utc>,
    },

    #[error("{platform} credential for shop {shop_id} is invalid: {reason}")]
    Invalid {
        shop_id: String,
        platform: Platform,
        reason: String,
    },

    #[error("credential store error: {0}")]
    Store(#[from] ShopsyncError),
}

impl CredentialError {
    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::NotFound { .. } => "CREDENTIAL_NOT_FOUND",
            CredentialError::Expired { .. } => "CREDENTIAL_EXPIRED",
            CredentialError::Invalid { .. } => "CREDENTIAL_INVALID",
            CredentialError::Store(_) => "CREDENTIAL_STORE_ERROR",
        }
    }
}

/// A usable credential together with the shop it belongs to.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub credential: ShopCredential,
    pub shop: Shop,
}

/// What the job runner needs from credential resolution.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> Result<ResolvedCredential, CredentialError>;

    /// Platforms the shop holds a usable credential for.
    async fn platforms_for_shop(&self, shop_id: &str) -> Result<Vec<Platform>, CredentialError>;

    /// Drops anything cached for the shop so the next call re-reads the source.
    async fn invalidate_shop(&self, shop_id: &str);

    /// Drops the whole cache.
    async fn invalidate(&self);
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

/// Read-through cache over a [`CredentialSource`].
///
/// Three tiers share one TTL: credentials by (shop, platform), shops by id,
/// and eligible platform lists by shop. The TTL only bounds staleness of the
/// cached rows; expiry of the credential itself is checked on every call.
pub struct CredentialStore<S, C> {
    source: S,
    clock: C,
    ttl: chrono::Duration,
    credentials: RwLock<HashMap<(String, Platform), Cached<ShopCredential>>>,
    shops: RwLock<HashMap<String, Cached<Shop>>>,
    platforms: RwLock<HashMap<String, Cached<Vec<Platform>>>>,
}

impl<S, C> CredentialStore<S, C>
where
    S: CredentialSource,
    C: Clock,
{
    pub fn new(source: S, clock: C, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5)),
            credentials: RwLock::new(HashMap::new()),
            shops: RwLock::new(HashMap::new()),
            platforms: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh<T>(&self, entry: &Cached<T>, now: DateTime<Utc>) -> bool {
        now - entry.fetched_at < self.ttl
    }

    pub async fn get(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> Result<ResolvedCredential, CredentialError> {
        let credential = self.credential(shop_id, platform).await?;
        validate(&credential, self.clock.now())?;
        let shop = self.shop(shop_id).await?;
        Ok(ResolvedCredential { credential, shop })
    }

    async fn credential(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> Result<ShopCredential, CredentialError> {
        let key = (shop_id.to_string(), platform);
        let now = self.clock.now();
        {
            let cache = self.credentials.read().await;
            if let Some(entry) = cache.get(&key) {
                if self.is_fresh(entry, now) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let mut cache = self.credentials.write().await;
        if let Some(entry) = cache.get(&key) {
            if self.is_fresh(entry, now) {
                return Ok(entry.value.clone());
            }
        }

        tracing::debug!(shop_id, platform = %platform, "credential cache miss");
        let credential = self
            .source
            .get_credential(shop_id, platform)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                shop_id: shop_id.to_string(),
                platform: platform.to_string(),
            })?;
        cache.insert(
            key,
            Cached {
                value: credential.clone(),
                fetched_at: now,
            },
        );
        Ok(credential)
    }

    async fn shop(&self, shop_id: &str) -> Result<Shop, CredentialError> {
        let now = self.clock.now();
        {
            let cache = self.shops.read().await;
            if let Some(entry) = cache.get(shop_id) {
                if self.is_fresh(entry, now) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let mut cache = self.shops.write().await;
        if let Some(entry) = cache.get(shop_id) {
            if self.is_fresh(entry, now) {
                return Ok(entry.value.clone());
            }
        }

        let shop = self
            .source
            .get_shop(shop_id)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                shop_id: shop_id.to_string(),
                platform: "shop".to_string(),
            })?;
        cache.insert(
            shop_id.to_string(),
            Cached {
                value: shop.clone(),
                fetched_at: now,
            },
        );
        Ok(shop)
    }

    /// Platforms the shop can currently sync: a token is present and not expired.
    pub async fn list_platforms_for_shop(
        &self,
        shop_id: &str,
    ) -> Result<Vec<Platform>, CredentialError> {
        let now = self.clock.now();
        {
            let cache = self.platforms.read().await;
            if let Some(entry) = cache.get(shop_id) {
                if self.is_fresh(entry, now) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let mut cache = self.platforms.write().await;
        if let Some(entry) = cache.get(shop_id) {
            if self.is_fresh(entry, now) {
                return Ok(entry.value.clone());
            }
        }

        let mut platforms: Vec<Platform> = self
            .source
            .list_credentials(shop_id)
            .await?
            .iter()
            .filter(|c| validate(c, now).is_ok())
            .map(|c| c.platform)
            .collect();
        platforms.sort();
        platforms.dedup();
        cache.insert(
            shop_id.to_string(),
            Cached {
                value: platforms.clone(),
                fetched_at: now,
            },
        );
        Ok(platforms)
    }

    pub async fn invalidate(&self) {
        self.credentials.write().await.clear();
        self.shops.write().await.clear();
        self.platforms.write().await.clear();
        tracing::info!("credential cache invalidated");
    }

    pub async fn invalidate_shop(&self, shop_id: &str) {
        self.credentials
            .write()
            .await
            .retain(|(shop, _), _| shop != shop_id);
        self.shops.write().await.remove(shop_id);
        self.platforms.write().await.remove(shop_id);
        tracing::info!(shop_id, "credential cache invalidated for shop");
    }
}

fn validate(credential: &ShopCredential, now: DateTime<Utc>) -> Result<(), CredentialError> {
    if !credential.has_token() {
        return Err(CredentialError::Invalid {
            shop_id: credential.shop_id.clone(),
            platform: credential.platform,
            reason: "access token is empty".to_string(),
        });
    }
    if let Some(expires_at) = credential.expires_at {
        if credential.is_expired_at(now) {
            return Err(CredentialError::Expired {
                shop_id: credential.shop_id.clone(),
                platform: credential.platform,
                expires_at,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl<S, C> CredentialResolver for CredentialStore<S, C>
where
    S: CredentialSource,
    C: Clock,
{
    async fn resolve(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> Result<ResolvedCredential, CredentialError> {
        self.get(shop_id, platform).await
    }

    async fn platforms_for_shop(&self, shop_id: &str) -> Result<Vec<Platform>, CredentialError> {
        self.list_platforms_for_shop(shop_id).await
    }

    async fn invalidate_shop(&self, shop_id: &str) {
        CredentialStore::invalidate_shop(self, shop_id).await
    }

    async fn invalidate(&self) {
        CredentialStore::invalidate(self).await
    }
}

#[async_trait]
impl<T: CredentialResolver + ?Sized> CredentialResolver for Arc<T> {
    async fn resolve(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> Result<ResolvedCredential, CredentialError> {
        (**self).resolve(shop_id, platform).await
    }

    async fn platforms_for_shop(&self, shop_id: &str) -> Result<Vec<Platform>, CredentialError> {
        (**self).platforms_for_shop(shop_id).await
    }

    async fn invalidate_shop(&self, shop_id: &str) {
        (**self).invalidate_shop(shop_id).await
    }

    async fn invalidate(&self) {
        (**self).invalidate().await
    }
}
