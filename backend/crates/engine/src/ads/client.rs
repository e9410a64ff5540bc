use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde_json::{json, Value};

use super::models::{Breakdown, InsightsPage, Level, INSIGHT_FIELDS};
use crate::clock::Clock;
use crate::http::{send_json, ApiError};

#[derive(Debug, Clone, Copy)]
pub struct InsightsQuery {
    pub level: Level,
    pub breakdown: Breakdown,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub limit: u32,
}

/// Marketing API client for one ad account's insights.
#[derive(Clone)]
pub struct MetaClient {
    http: Client,
    base_url: String,
    api_version: String,
    access_token: String,
    max_retries: u32,
    clock: Arc<dyn Clock>,
}

impl MetaClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        access_token: impl Into<String>,
        max_retries: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            access_token: access_token.into(),
            max_retries,
            clock,
        }
    }

    fn insights_url(&self, account_id: &str) -> String {
        format!(
            "{}/{}/act_{}/insights",
            self.base_url, self.api_version, account_id
        )
    }

    async fn first_page(
        &self,
        account_id: &str,
        query: &InsightsQuery,
    ) -> Result<InsightsPage, ApiError> {
        let url = self.insights_url(account_id);
        let time_range = json!({
            "since": query.since.format("%Y-%m-%d").to_string(),
            "until": query.until.format("%Y-%m-%d").to_string(),
        })
        .to_string();
        let mut params = vec![
            ("level", query.level.as_str().to_string()),
            ("fields", INSIGHT_FIELDS.to_string()),
            ("time_range", time_range),
            ("time_increment", "1".to_string()),
            ("limit", query.limit.to_string()),
            ("access_token", self.access_token.clone()),
        ];
        if let Some(breakdowns) = query.breakdown.api_param() {
            params.push(("breakdowns", breakdowns));
        }

        send_json(
            &self.http,
            |c| c.get(&url).query(&params),
            self.max_retries,
            self.clock.as_ref(),
        )
        .await
    }

    async fn next_page(&self, next_url: &str) -> Result<InsightsPage, ApiError> {
        send_json(
            &self.http,
            |c| c.get(next_url),
            self.max_retries,
            self.clock.as_ref(),
        )
        .await
    }

    /// All rows for one level × breakdown, following `paging.next` and
    /// pausing `page_delay` between pages.
    pub async fn fetch_insights(
        &self,
        account_id: &str,
        query: &InsightsQuery,
        page_delay: Duration,
    ) -> Result<Vec<Value>, ApiError> {
        let mut page = self.first_page(account_id, query).await?;
        let mut rows = Vec::new();
        let mut pages = 1;

        loop {
            tracing::debug!(
                level = %query.level,
                breakdown = %query.breakdown,
                page = pages,
                rows = page.data.len(),
                "fetched insights page"
            );
            let next = page.next_url().map(str::to_string);
            rows.append(&mut page.data);

            match next {
                Some(url) => {
                    self.clock.sleep(page_delay).await;
                    page = self.next_page(&url).await?;
                    pages += 1;
                }
                None => break,
            }
        }
        Ok(rows)
    }
}
