use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::Value;

use super::bulk::{run_bulk, BulkResult};
use super::client::ShopifyClient;
use super::models::{
    gid_type, order_updated_at, to_staged_line_item, to_staged_order, to_staged_payout,
    to_staged_transaction,
};
use super::queries::{orders_query, payouts_query};
use crate::clock::Clock;
use crate::driver::{PlatformSyncDriver, SyncContext, SyncResult};
use crate::error::SyncError;
use crate::retry::RetryPolicy;
use shopsync_common::Platform;
use shopsync_config::ShopifyConfig;
use shopsync_db::staging::models::{RecordKind, StagedPayload, StagedRecord};
use shopsync_db::staging::repositories::StagingSink;

/// Record families promoted after a commerce run, in transform order.
const TRANSFORM_ORDER: [RecordKind; 4] = [
    RecordKind::Order,
    RecordKind::LineItem,
    RecordKind::Transaction,
    RecordKind::Payout,
];

/// Orders and their children collected from one bulk result file.
#[derive(Debug, Default)]
struct OrderBuckets {
    orders: Vec<StagedRecord>,
    line_items: Vec<StagedRecord>,
    transactions: Vec<StagedRecord>,
    failed_orders: HashSet<String>,
    max_updated_at: Option<DateTime<Utc>>,
    skipped: usize,
    errors: usize,
}

impl OrderBuckets {
    fn push_line(&mut self, text: &str) {
        let line: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed bulk line");
                self.errors += 1;
                return;
            }
        };
        let id = line.get("id").and_then(Value::as_str).unwrap_or_default().to_string();

        match gid_type(&id) {
            Some("Order") => self.push_order(id, &line),
            Some("LineItem") => {
                if self.parent_failed(&line) {
                    self.skipped += 1;
                    return;
                }
                match to_staged_line_item(&line) {
                    Ok(item) => self
                        .line_items
                        .push(StagedRecord::new(id, StagedPayload::LineItem(item))),
                    Err(e) => {
                        tracing::warn!(natural_id = %id, error = %e, "skipping line item");
                        self.errors += 1;
                    }
                }
            }
            Some("OrderTransaction") => {
                if self.parent_failed(&line) {
                    self.skipped += 1;
                    return;
                }
                self.push_transaction(&line, None);
            }
            _ => {
                tracing::debug!(natural_id = %id, "ignoring unrecognized bulk line");
                self.skipped += 1;
            }
        }
    }

    fn push_order(&mut self, id: String, line: &Value) {
        // Every observed parent counts toward the watermark, converted or not.
        if let Some(updated_at) = order_updated_at(line) {
            self.max_updated_at = self.max_updated_at.max(Some(updated_at));
        }

        match to_staged_order(line) {
            Ok(order) => {
                if let Some(inline) = line.get("transactions").and_then(Value::as_array) {
                    for tx in inline {
                        self.push_transaction(tx, Some(&id));
                    }
                }
                self.orders
                    .push(StagedRecord::new(id, StagedPayload::Order(order)));
            }
            Err(e) => {
                tracing::warn!(natural_id = %id, error = %e, "skipping order");
                self.failed_orders.insert(id);
                self.errors += 1;
            }
        }
    }

    fn push_transaction(&mut self, line: &Value, order_id: Option<&str>) {
        match to_staged_transaction(line, order_id) {
            Ok(tx) => self.transactions.push(StagedRecord::new(
                tx.transaction_id.clone(),
                StagedPayload::Transaction(tx),
            )),
            Err(e) => {
                let id = line.get("id").and_then(Value::as_str).unwrap_or_default();
                tracing::warn!(natural_id = %id, error = %e, "skipping transaction");
                self.errors += 1;
            }
        }
    }

    fn parent_failed(&self, line: &Value) -> bool {
        line.get("__parentId")
            .and_then(Value::as_str)
            .is_some_and(|parent| self.failed_orders.contains(parent))
    }

    fn watermark(&self) -> Option<Value> {
        self.max_updated_at
            .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true)))
    }
}

#[derive(Debug, Default)]
struct PayoutBucket {
    payouts: Vec<StagedRecord>,
    skipped: usize,
    errors: usize,
}

impl PayoutBucket {
    fn push_line(&mut self, text: &str) {
        let line: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed payout line");
                self.errors += 1;
                return;
            }
        };
        let id = line.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        if gid_type(&id) != Some("ShopifyPaymentsPayout") {
            self.skipped += 1;
            return;
        }
        match to_staged_payout(&line) {
            Ok(payout) => self
                .payouts
                .push(StagedRecord::new(id, StagedPayload::Payout(payout))),
            Err(e) => {
                tracing::warn!(natural_id = %id, error = %e, "skipping payout");
                self.errors += 1;
            }
        }
    }
}

/// Commerce platform driver built on Shopify bulk operations.
pub struct CommerceDriver {
    http: Client,
    config: ShopifyConfig,
    max_retries: u32,
    staging: Arc<dyn StagingSink>,
    clock: Arc<dyn Clock>,
}

impl CommerceDriver {
    pub fn new(
        http: Client,
        config: ShopifyConfig,
        max_retries: u32,
        staging: Arc<dyn StagingSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            config,
            max_retries,
            staging,
            clock,
        }
    }

    fn poll_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_secs(self.config.bulk_poll_interval_secs),
            self.config.bulk_max_poll_attempts,
        )
    }

    fn client_for(&self, ctx: &SyncContext) -> ShopifyClient {
        let base_url = self
            .config
            .base_url_override
            .clone()
            .unwrap_or_else(|| format!("https://{}", ctx.credential.shop.domain));
        ShopifyClient::new(
            self.http.clone(),
            base_url,
            ctx.credential.credential.access_token.clone(),
            self.config.api_version.clone(),
            self.max_retries,
            self.clock.clone(),
        )
    }

    /// Lower bound for an incremental run: the stored watermark, or the
    /// lookback window when there is none.
    fn updated_since(&self, ctx: &SyncContext) -> Option<DateTime<Utc>> {
        if ctx.job.job_type.is_historical() {
            return None;
        }
        ctx.cursor
            .as_ref()
            .and_then(|c| c.watermark_time())
            .or_else(|| {
                Some(
                    self.clock.now()
                        - chrono::Duration::days(i64::from(self.config.incremental_lookback_days)),
                )
            })
    }

    async fn download(
        &self,
        client: &ShopifyClient,
        result: &BulkResult,
        on_line: impl FnMut(&str),
    ) -> Result<usize, SyncError> {
        match (&result.url, result.is_empty()) {
            (Some(url), false) => Ok(client.download_lines(url, on_line).await?),
            _ => Ok(0),
        }
    }

    async fn stage(
        &self,
        shop_id: &str,
        kind: RecordKind,
        records: &[StagedRecord],
    ) -> Result<usize, SyncError> {
        if records.is_empty() {
            return Ok(0);
        }
        Ok(self.staging.stage(shop_id, kind, records).await?)
    }

    async fn sync_orders(
        &self,
        client: &ShopifyClient,
        ctx: &SyncContext,
    ) -> Result<OrderBuckets, SyncError> {
        let shop_id = ctx.job.shop_id.as_str();
        let since = self.updated_since(ctx);
        tracing::info!(
            shop_id,
            job_type = %ctx.job.job_type,
            since = ?since,
            "starting orders bulk export"
        );

        let result = run_bulk(
            client,
            &orders_query(since),
            &self.poll_policy(),
            self.clock.as_ref(),
        )
        .await?;

        let mut buckets = OrderBuckets::default();
        let lines = self
            .download(client, &result, |line| buckets.push_line(line))
            .await?;

        self.stage(shop_id, RecordKind::Order, &buckets.orders).await?;
        self.stage(shop_id, RecordKind::LineItem, &buckets.line_items)
            .await?;
        self.stage(shop_id, RecordKind::Transaction, &buckets.transactions)
            .await?;

        tracing::info!(
            shop_id,
            lines,
            orders = buckets.orders.len(),
            line_items = buckets.line_items.len(),
            transactions = buckets.transactions.len(),
            errors = buckets.errors,
            "orders staged"
        );
        Ok(buckets)
    }

    async fn sync_payouts(
        &self,
        client: &ShopifyClient,
        ctx: &SyncContext,
    ) -> Result<PayoutBucket, SyncError> {
        let shop_id = ctx.job.shop_id.as_str();
        let result = run_bulk(
            client,
            &payouts_query(),
            &self.poll_policy(),
            self.clock.as_ref(),
        )
        .await?;

        let mut bucket = PayoutBucket::default();
        self.download(client, &result, |line| bucket.push_line(line))
            .await?;

        if ctx.job.job_type.is_historical() {
            let cleared = self.staging.clear(shop_id, RecordKind::Payout).await?;
            tracing::info!(shop_id, cleared, "cleared payout staging for full refresh");
        }
        self.stage(shop_id, RecordKind::Payout, &bucket.payouts).await?;

        tracing::info!(shop_id, payouts = bucket.payouts.len(), "payouts staged");
        Ok(bucket)
    }
}

#[async_trait]
impl PlatformSyncDriver for CommerceDriver {
    fn platform(&self) -> Platform {
        Platform::Shopify
    }

    async fn sync(&self, ctx: &SyncContext) -> Result<SyncResult, SyncError> {
        let client = self.client_for(ctx);
        let orders = self.sync_orders(&client, ctx).await?;
        let payouts = self.sync_payouts(&client, ctx).await?;

        let mut promoted = 0;
        for kind in TRANSFORM_ORDER {
            let count = self.staging.transform(&ctx.job.shop_id, kind).await?;
            tracing::debug!(shop_id = %ctx.job.shop_id, kind = %kind, count, "transform finished");
            promoted += count;
        }

        Ok(SyncResult {
            records_synced: orders.orders.len(),
            records_promoted: promoted,
            skipped: orders.skipped + payouts.skipped,
            errors: orders.errors + payouts.errors,
            watermark: orders.watermark(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credentials::ResolvedCredential;
    use serde_json::json;
    use shopsync_db::credentials::models::{Shop, ShopCredential};
    use shopsync_db::cursors::models::SyncCursor;
    use shopsync_db::jobs::models::{JobStatus, JobType, SyncJob};
    use shopsync_db::staging::memory::InMemoryStagingSink;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(job_type: JobType, cursor: Option<&str>) -> SyncContext {
        SyncContext {
            job: SyncJob {
                id: uuid::Uuid::new_v4(),
                shop_id: "acme".into(),
                platform: Platform::Shopify,
                job_type,
                status: JobStatus::InProgress,
                metadata: json!({}),
                error: None,
                records_synced: None,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                completed_at: None,
            },
            credential: ResolvedCredential {
                credential: ShopCredential {
                    shop_id: "acme".into(),
                    platform: Platform::Shopify,
                    access_token: "shpat_test".into(),
                    refresh_token: None,
                    expires_at: None,
                    metadata: json!({}),
                },
                shop: Shop {
                    id: "acme".into(),
                    domain: "acme.myshopify.com".into(),
                    currency: Some("USD".into()),
                    metadata: json!({}),
                },
            },
            cursor: cursor.map(|wm| SyncCursor {
                shop_id: "acme".into(),
                platform: Platform::Shopify,
                watermark: json!(wm),
                last_success_at: None,
                updated_at: Utc::now(),
            }),
        }
    }

    fn driver(server: &MockServer, staging: Arc<InMemoryStagingSink>) -> CommerceDriver {
        let config = ShopifyConfig {
            base_url_override: Some(server.uri()),
            ..ShopifyConfig::default()
        };
        CommerceDriver::new(
            crate::http::build_client(Duration::from_secs(5)).unwrap(),
            config,
            0,
            staging,
            Arc::new(ManualClock::default()),
        )
    }

    /// Mount submit + completed poll for one bulk operation, plus its result file.
    async fn mount_bulk(
        server: &MockServer,
        query_marker: &str,
        op: u32,
        result: Option<(&str, String)>,
        object_count: usize,
    ) {
        let gid = format!("gid://shopify/BulkOperation/{op}");
        Mock::given(method("POST"))
            .and(body_string_contains("bulkOperationRunQuery"))
            .and(body_string_contains(query_marker))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "bulkOperationRunQuery": {
                    "bulkOperation": { "id": gid, "status": "CREATED" },
                    "userErrors": []
                }}
            })))
            .mount(server)
            .await;

        let url = result
            .as_ref()
            .map(|(file, _)| format!("{}/{file}", server.uri()));
        Mock::given(method("POST"))
            .and(body_string_contains("node(id"))
            .and(body_string_contains(gid.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "node": {
                    "id": gid,
                    "status": "COMPLETED",
                    "objectCount": object_count.to_string(),
                    "url": url
                }}
            })))
            .mount(server)
            .await;

        if let Some((file, body)) = result {
            Mock::given(method("GET"))
                .and(path(format!("/{file}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(server)
                .await;
        }
    }

    fn order(n: u32, valid: bool) -> Value {
        let mut line = json!({
            "id": format!("gid://shopify/Order/{n}"),
            "name": format!("#{n}"),
            "currencyCode": "USD",
            "totalPriceSet": { "shopMoney": { "amount": "50.00", "currencyCode": "USD" } },
            "createdAt": "2024-05-01T00:00:00Z",
            "updatedAt": format!("2024-05-{n:02}T12:00:00Z"),
            "transactions": [{
                "id": format!("gid://shopify/OrderTransaction/{n}"),
                "kind": "SALE",
                "status": "SUCCESS",
                "amountSet": { "shopMoney": { "amount": "50.00", "currencyCode": "USD" } }
            }]
        });
        if !valid {
            line.as_object_mut().unwrap().remove("totalPriceSet");
        }
        line
    }

    fn line_item(n: u32, order: u32) -> Value {
        json!({
            "id": format!("gid://shopify/LineItem/{n}"),
            "__parentId": format!("gid://shopify/Order/{order}"),
            "title": "Widget",
            "sku": "W-1",
            "quantity": 2,
            "originalUnitPriceSet": { "shopMoney": { "amount": "25.00", "currencyCode": "USD" } }
        })
    }

    fn jsonl(lines: &[Value]) -> String {
        lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn per_record_failures_are_excluded_but_still_move_the_watermark() {
        let server = MockServer::start().await;
        let mut lines = Vec::new();
        for n in 1..=10 {
            // Orders 4 and 10 are malformed; 10 carries the latest updatedAt.
            lines.push(order(n, n != 4 && n != 10));
            lines.push(line_item(100 + n, n));
        }
        mount_bulk(&server, "orders", 1, Some(("orders.jsonl", jsonl(&lines))), 20).await;
        mount_bulk(&server, "shopifyPaymentsAccount", 2, None, 0).await;

        let staging = Arc::new(InMemoryStagingSink::new());
        let result = driver(&server, staging.clone())
            .sync(&context(JobType::Incremental, Some("2024-04-30T00:00:00Z")))
            .await
            .unwrap();

        assert_eq!(result.records_synced, 8);
        assert_eq!(result.errors, 2);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.watermark, Some(json!("2024-05-10T12:00:00Z")));
        assert_eq!(staging.staged_len("acme", RecordKind::Order), 8);
        assert_eq!(staging.staged_len("acme", RecordKind::LineItem), 8);
        assert_eq!(staging.staged_len("acme", RecordKind::Transaction), 8);
        assert_eq!(result.records_promoted, 24);
    }

    #[tokio::test]
    async fn completed_with_zero_objects_is_an_empty_success() {
        let server = MockServer::start().await;
        mount_bulk(&server, "orders", 1, None, 0).await;
        mount_bulk(&server, "shopifyPaymentsAccount", 2, None, 0).await;

        let staging = Arc::new(InMemoryStagingSink::new());
        let result = driver(&server, staging.clone())
            .sync(&context(JobType::Incremental, None))
            .await
            .unwrap();

        assert_eq!(result.records_synced, 0);
        assert_eq!(result.records_promoted, 0);
        assert_eq!(result.watermark, None);
    }

    #[tokio::test]
    async fn incremental_query_uses_the_stored_watermark() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("updated_at:>'2024-05-01T08:00:00Z'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "bulkOperationRunQuery": {
                    "bulkOperation": { "id": "gid://shopify/BulkOperation/1", "status": "CREATED" },
                    "userErrors": []
                }}
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_bulk(&server, "orders", 1, None, 0).await;
        mount_bulk(&server, "shopifyPaymentsAccount", 2, None, 0).await;

        let staging = Arc::new(InMemoryStagingSink::new());
        driver(&server, staging)
            .sync(&context(JobType::Incremental, Some("2024-05-01T08:00:00Z")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn historical_run_refreshes_payouts_even_when_empty() {
        let server = MockServer::start().await;
        mount_bulk(&server, "orders", 1, None, 0).await;
        mount_bulk(&server, "shopifyPaymentsAccount", 2, None, 0).await;

        let staging = Arc::new(InMemoryStagingSink::new());
        let stale = to_staged_payout(&json!({
            "id": "gid://shopify/ShopifyPaymentsPayout/1",
            "status": "PAID",
            "net": { "amount": "10.00", "currencyCode": "USD" }
        }))
        .unwrap();
        staging
            .stage(
                "acme",
                RecordKind::Payout,
                &[StagedRecord::new("gid://shopify/ShopifyPaymentsPayout/1", StagedPayload::Payout(stale))],
            )
            .await
            .unwrap();

        driver(&server, staging.clone())
            .sync(&context(JobType::HistoricalInit, None))
            .await
            .unwrap();
        assert_eq!(staging.staged_len("acme", RecordKind::Payout), 0);
    }

    #[tokio::test]
    async fn payouts_are_staged_from_their_own_bulk_operation() {
        let server = MockServer::start().await;
        let payouts = jsonl(&[
            json!({ "id": "gid://shopify/ShopifyPaymentsPayout/1", "status": "PAID", "issuedAt": "2024-05-03T00:00:00Z", "net": { "amount": "120.00", "currencyCode": "USD" } }),
            json!({ "id": "gid://shopify/ShopifyPaymentsPayout/2", "status": "SCHEDULED", "net": { "amount": "80.00", "currencyCode": "USD" } }),
        ]);
        mount_bulk(&server, "orders", 1, None, 0).await;
        mount_bulk(&server, "shopifyPaymentsAccount", 2, Some(("payouts.jsonl", payouts)), 2).await;

        let staging = Arc::new(InMemoryStagingSink::new());
        let result = driver(&server, staging.clone())
            .sync(&context(JobType::Incremental, None))
            .await
            .unwrap();

        assert_eq!(staging.staged_len("acme", RecordKind::Payout), 2);
        assert_eq!(result.records_promoted, 2);
        assert_eq!(result.records_synced, 0);
    }

    #[tokio::test]
    async fn transform_failure_fails_the_run() {
        let server = MockServer::start().await;
        mount_bulk(&server, "orders", 1, None, 0).await;
        mount_bulk(&server, "shopifyPaymentsAccount", 2, None, 0).await;

        let staging = Arc::new(InMemoryStagingSink::new());
        staging.fail_transform(RecordKind::Transaction).unwrap();
        let err = driver(&server, staging)
            .sync(&context(JobType::Incremental, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_ERROR");
    }
}
