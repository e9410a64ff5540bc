use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::credentials::models::{Shop, ShopCredential};
use crate::credentials::repositories::CredentialSource;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::Platform;

#[derive(Clone)]
pub struct PgCredentialSource {
    pool: PgPool,
}

impl PgCredentialSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_credential(row: sqlx::postgres::PgRow) -> ShopsyncResult<ShopCredential> {
        Ok(ShopCredential {
            shop_id: row.get("shop_id"),
            platform: row.get::<String, _>("platform").parse()?,
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            expires_at: row.get("expires_at"),
            metadata: row.get("metadata"),
        })
    }
}

#[async_trait]
impl CredentialSource for PgCredentialSource {
    async fn get_credential(
        &self,
        shop_id: &str,
        platform: Platform,
    ) -> ShopsyncResult<Option<ShopCredential>> {
        let row = sqlx::query(
            "select shop_id, platform, access_token, refresh_token, expires_at, metadata
             from shop_credentials
             where shop_id = $1 and platform = $2",
        )
        .bind(shop_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(Self::map_credential).transpose()
    }

    async fn get_shop(&self, shop_id: &str) -> ShopsyncResult<Option<Shop>> {
        let row = sqlx::query("select id, domain, currency, metadata from shops where id = $1")
            .bind(shop_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(row.map(|r| Shop {
            id: r.get("id"),
            domain: r.get("domain"),
            currency: r.get("currency"),
            metadata: r.get("metadata"),
        }))
    }

    async fn list_credentials(&self, shop_id: &str) -> ShopsyncResult<Vec<ShopCredential>> {
        let rows = sqlx::query(
            "select shop_id, platform, access_token, refresh_token, expires_at, metadata
             from shop_credentials
             where shop_id = $1
             order by platform",
        )
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_credential).collect()
    }
}
