use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use reqwest::Client;

use super::client::{InsightsQuery, MetaClient};
use super::models::{insight_natural_id, to_staged_insight, Breakdown, Level};
use crate::clock::Clock;
use crate::driver::{PlatformSyncDriver, SyncContext, SyncResult};
use crate::error::SyncError;
use shopsync_common::Platform;
use shopsync_config::MetaConfig;
use shopsync_db::staging::models::{RecordKind, StagedPayload, StagedRecord};
use shopsync_db::staging::repositories::StagingSink;

/// Ads platform driver: paginated insights for every level × breakdown.
pub struct AdsDriver {
    http: Client,
    config: MetaConfig,
    max_retries: u32,
    staging: Arc<dyn StagingSink>,
    clock: Arc<dyn Clock>,
}

/// Per-combination outcome counters.
#[derive(Debug, Default)]
struct Tally {
    staged: usize,
    row_errors: usize,
    failed_combinations: usize,
}

impl AdsDriver {
    pub fn new(
        http: Client,
        config: MetaConfig,
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

    /// Inclusive date window for this run.
    fn date_range(&self, ctx: &SyncContext) -> (NaiveDate, NaiveDate) {
        let today = self.clock.now().date_naive();
        let until = today
            .checked_sub_days(Days::new(u64::from(self.config.reporting_delay_days)))
            .unwrap_or(today);
        let back = |days: u32| {
            until
                .checked_sub_days(Days::new(u64::from(days)))
                .unwrap_or(until)
        };

        let since = if ctx.job.job_type.is_historical() {
            back(self.config.historical_days)
        } else {
            // The watermark day itself is fetched again: recent days get restated.
            ctx.cursor
                .as_ref()
                .and_then(|c| c.watermark_time())
                .map(|t| t.date_naive())
                .unwrap_or_else(|| back(self.config.incremental_lookback_days))
        };
        (since.min(until), until)
    }

    async fn sync_combination(
        &self,
        client: &MetaClient,
        shop_id: &str,
        account_id: &str,
        query: &InsightsQuery,
        tally: &mut Tally,
    ) -> Result<(), SyncError> {
        let rows = client
            .fetch_insights(account_id, query, self.config.page_delay())
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match to_staged_insight(row, query.level, query.breakdown) {
                Ok(insight) => {
                    let natural_id = insight_natural_id(&insight);
                    records.push(StagedRecord::new(
                        natural_id,
                        StagedPayload::AdInsight(insight),
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        shop_id,
                        level = %query.level,
                        breakdown = %query.breakdown,
                        error = %e,
                        "skipping insight row"
                    );
                    tally.row_errors += 1;
                }
            }
        }

        if !records.is_empty() {
            tally.staged += self
                .staging
                .stage(shop_id, RecordKind::AdInsight, &records)
                .await?;
        }
        tracing::info!(
            shop_id,
            level = %query.level,
            breakdown = %query.breakdown,
            rows = rows.len(),
            staged = records.len(),
            "insights staged"
        );
        Ok(())
    }
}

#[async_trait]
impl PlatformSyncDriver for AdsDriver {
    fn platform(&self) -> Platform {
        Platform::Meta
    }

    async fn sync(&self, ctx: &SyncContext) -> Result<SyncResult, SyncError> {
        let shop_id = ctx.job.shop_id.as_str();
        let account_id = ctx
            .credential
            .credential
            .ad_account_id()
            .ok_or_else(|| SyncError::MissingMetadata("ad_account_id".to_string()))?
            .to_string();
        let (since, until) = self.date_range(ctx);
        tracing::info!(shop_id, account_id = %account_id, %since, %until, "starting insights sync");

        let client = MetaClient::new(
            self.http.clone(),
            self.config.api_base_url.clone(),
            self.config.api_version.clone(),
            ctx.credential.credential.access_token.clone(),
            self.max_retries,
            self.clock.clone(),
        );

        let mut tally = Tally::default();
        let mut last_error = None;
        let combinations = Level::ALL.len() * Breakdown::ALL.len();

        for level in Level::ALL {
            for breakdown in Breakdown::ALL {
                let query = InsightsQuery {
                    level,
                    breakdown,
                    since,
                    until,
                    limit: self.config.page_size,
                };
                match self
                    .sync_combination(&client, shop_id, &account_id, &query, &mut tally)
                    .await
                {
                    Ok(()) => {}
                    Err(e @ SyncError::Api(_)) => {
                        tracing::warn!(
                            shop_id,
                            level = %level,
                            breakdown = %breakdown,
                            error = %e,
                            "insights fetch failed, continuing with other breakdowns"
                        );
                        tally.failed_combinations += 1;
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if tally.failed_combinations == combinations {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let promoted = self
            .staging
            .transform(shop_id, RecordKind::AdInsight)
            .await?;

        Ok(SyncResult {
            records_synced: tally.staged,
            records_promoted: promoted,
            skipped: 0,
            errors: tally.row_errors + tally.failed_combinations,
            watermark: Some(serde_json::Value::String(
                until.format("%Y-%m-%d").to_string(),
            )),
        })
    }
}
