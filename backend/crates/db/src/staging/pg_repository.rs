use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::staging::models::{RecordKind, StagedRecord};
use crate::staging::repositories::{check_kinds, StagingSink};
use shopsync_common::error::{ShopsyncError, ShopsyncResult};

#[derive(Clone)]
pub struct PgStagingSink {
    pool: PgPool,
}

impl PgStagingSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> ShopsyncError {
    ShopsyncError::Database(e.to_string())
}

#[async_trait]
impl StagingSink for PgStagingSink {
    async fn stage(
        &self,
        shop_id: &str,
        kind: RecordKind,
        records: &[StagedRecord],
    ) -> ShopsyncResult<usize> {
        check_kinds(kind, records)?;
        if records.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "insert into {} (shop_id, natural_id, schema_version, payload, received_at)
             values ($1, $2, $3, $4, $5)
             on conflict (shop_id, natural_id) do update set
               schema_version = excluded.schema_version,
               payload = excluded.payload,
               received_at = excluded.received_at",
            kind.staging_table()
        );

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for record in records {
            let payload = serde_json::to_value(&record.payload).map_err(|e| {
                ShopsyncError::Internal(format!(
                    "failed to encode staged {kind} {}: {e}",
                    record.natural_id
                ))
            })?;
            sqlx::query(&sql)
                .bind(shop_id)
                .bind(&record.natural_id)
                .bind(i32::from(record.schema_version))
                .bind(payload)
                .bind(record.received_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        tracing::debug!(shop_id, kind = %kind, count = records.len(), "staged records");
        Ok(records.len())
    }

    async fn clear(&self, shop_id: &str, kind: RecordKind) -> ShopsyncResult<u64> {
        let result = sqlx::query(&format!(
            "delete from {} where shop_id = $1",
            kind.staging_table()
        ))
        .bind(shop_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn transform(&self, shop_id: &str, kind: RecordKind) -> ShopsyncResult<u64> {
        let row = sqlx::query(&format!(
            "select coalesce({}($1), 0)::bigint as promoted",
            kind.transform_function()
        ))
        .bind(shop_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let promoted: i64 = row.get("promoted");
        Ok(promoted.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::models::{StagedPayload, StagedPayout};
    use crate::test_pool;
    use rust_decimal::Decimal;
    use serde_json::json;

    async fn test_sink() -> Option<(PgStagingSink, PgPool)> {
        let pool = test_pool().await?;
        Some((PgStagingSink::new(pool.clone()), pool))
    }

    fn payout(id: &str, amount: i64) -> StagedRecord {
        StagedRecord::new(
            id,
            StagedPayload::Payout(StagedPayout {
                payout_id: id.into(),
                status: "PAID".into(),
                amount: Decimal::from(amount),
                currency: "USD".into(),
                issued_at: None,
                raw: json!({ "id": id }),
            }),
        )
    }

    async fn staged_count(pool: &PgPool, shop: &str) -> i64 {
        sqlx::query("select count(*) as n from stg_shopify_payouts where shop_id = $1")
            .bind(shop)
            .fetch_one(pool)
            .await
            .expect("count")
            .get("n")
    }

    #[tokio::test]
    async fn stage_upserts_on_natural_id() {
        let (sink, pool) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let shop = format!("shop-{}", uuid::Uuid::new_v4());
        sink.stage(&shop, RecordKind::Payout, &[payout("p-1", 10), payout("p-2", 20)])
            .await
            .expect("stage");
        sink.stage(&shop, RecordKind::Payout, &[payout("p-1", 15)])
            .await
            .expect("restage");
        assert_eq!(staged_count(&pool, &shop).await, 2);

        let payload: serde_json::Value = sqlx::query(
            "select payload from stg_shopify_payouts where shop_id = $1 and natural_id = 'p-1'",
        )
        .bind(&shop)
        .fetch_one(&pool)
        .await
        .expect("row")
        .get("payload");
        assert_eq!(payload["amount"], "15");
    }

    #[tokio::test]
    async fn clear_only_touches_one_shop() {
        let (sink, pool) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let a = format!("shop-{}", uuid::Uuid::new_v4());
        let b = format!("shop-{}", uuid::Uuid::new_v4());
        sink.stage(&a, RecordKind::Payout, &[payout("p-1", 1)]).await.expect("a");
        sink.stage(&b, RecordKind::Payout, &[payout("p-1", 1)]).await.expect("b");

        assert_eq!(sink.clear(&a, RecordKind::Payout).await.expect("clear"), 1);
        assert_eq!(staged_count(&pool, &a).await, 0);
        assert_eq!(staged_count(&pool, &b).await, 1);
    }

    #[tokio::test]
    async fn stage_rejects_mismatched_kind() {
        let (sink, _) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let err = sink
            .stage("acme", RecordKind::Order, &[payout("p-1", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ShopsyncError::Validation(_)));
    }
}
