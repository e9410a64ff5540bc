use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::cursors::models::SyncCursor;
use crate::cursors::repositories::CursorStore;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::Platform;

#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> ShopsyncResult<SyncCursor> {
        Ok(SyncCursor {
            shop_id: row.get("shop_id"),
            platform: row.get::<String, _>("platform").parse()?,
            watermark: row.get("watermark"),
            last_success_at: row.get("last_success_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get(&self, shop_id: &str, platform: Platform) -> ShopsyncResult<Option<SyncCursor>> {
        let row = sqlx::query(
            "select shop_id, platform, watermark, last_success_at, updated_at
             from sync_cursors
             where shop_id = $1 and platform = $2",
        )
        .bind(shop_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    /// String watermarks are compared as text, which is chronological for the
    /// normalized forms the drivers write (`YYYY-MM-DDTHH:MM:SSZ`, `YYYY-MM-DD`).
    async fn advance(
        &self,
        shop_id: &str,
        platform: Platform,
        watermark: serde_json::Value,
    ) -> ShopsyncResult<SyncCursor> {
        let row = sqlx::query(
            "insert into sync_cursors (shop_id, platform, watermark, last_success_at, updated_at)
             values ($1, $2, $3, $4, $4)
             on conflict (shop_id, platform) do update set
               watermark = case
                 when jsonb_typeof(sync_cursors.watermark) <> 'string'
                   or jsonb_typeof(excluded.watermark) <> 'string'
                   or (excluded.watermark #>> '{}') >= (sync_cursors.watermark #>> '{}')
                 then excluded.watermark
                 else sync_cursors.watermark
               end,
               last_success_at = excluded.last_success_at,
               updated_at = excluded.updated_at
             returning shop_id, platform, watermark, last_success_at, updated_at",
        )
        .bind(shop_id)
        .bind(platform.as_str())
        .bind(&watermark)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;
    use serde_json::json;

    async fn test_store() -> Option<PgCursorStore> {
        Some(PgCursorStore::new(test_pool().await?))
    }

    fn unique_shop() -> String {
        format!("shop-{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn get_returns_none_before_first_run() {
        let store = match test_store().await {
            Some(s) => s,
            None => return,
        };
        let cursor = store.get(&unique_shop(), Platform::Shopify).await.expect("get");
        assert!(cursor.is_none());
    }

    #[tokio::test]
    async fn advance_inserts_then_moves_forward() {
        let store = match test_store().await {
            Some(s) => s,
            None => return,
        };
        let shop = unique_shop();
        store
            .advance(&shop, Platform::Shopify, json!("2024-05-01T00:00:00Z"))
            .await
            .expect("first");
        let cursor = store
            .advance(&shop, Platform::Shopify, json!("2024-05-02T00:00:00Z"))
            .await
            .expect("second");
        assert_eq!(cursor.watermark, json!("2024-05-02T00:00:00Z"));
        assert!(cursor.last_success_at.is_some());
    }

    #[tokio::test]
    async fn advance_never_moves_backwards() {
        let store = match test_store().await {
            Some(s) => s,
            None => return,
        };
        let shop = unique_shop();
        store
            .advance(&shop, Platform::Meta, json!("2024-05-10"))
            .await
            .expect("first");
        let cursor = store
            .advance(&shop, Platform::Meta, json!("2024-05-01"))
            .await
            .expect("second");
        assert_eq!(cursor.watermark, json!("2024-05-10"));
    }

    #[tokio::test]
    async fn cursors_are_scoped_per_platform() {
        let store = match test_store().await {
            Some(s) => s,
            None => return,
        };
        let shop = unique_shop();
        store
            .advance(&shop, Platform::Meta, json!("2024-05-10"))
            .await
            .expect("advance");
        assert!(store.get(&shop, Platform::Shopify).await.expect("get").is_none());
    }
}
