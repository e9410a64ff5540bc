use std::sync::Arc;

use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::bulk::BulkOperationError;
use super::models::{BulkOperation, BulkRunData, GraphqlResponse, NodeData, UserError};
use super::queries::{BULK_OPERATION_QUERY, BULK_RUN_MUTATION};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::http::{send_json, send_with_retry, ApiError};

/// Admin GraphQL client for one shop.
#[derive(Clone)]
pub struct ShopifyClient {
    http: Client,
    base_url: String,
    access_token: String,
    api_version: String,
    max_retries: u32,
    clock: Arc<dyn Clock>,
}

impl ShopifyClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
        max_retries: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            api_version: api_version.into(),
            max_retries,
            clock,
        }
    }

    fn graphql_url(&self) -> String {
        format!(
            "{}/admin/api/{}/graphql.json",
            self.base_url, self.api_version
        )
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ApiError> {
        let url = self.graphql_url();
        let body = json!({ "query": query, "variables": variables });
        let response: GraphqlResponse<T> = send_json(
            &self.http,
            |c| {
                c.post(&url)
                    .header("X-Shopify-Access-Token", &self.access_token)
                    .json(&body)
            },
            self.max_retries,
            self.clock.as_ref(),
        )
        .await?;

        if !response.errors.is_empty() {
            let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(ApiError::InvalidResponse(format!(
                "graphql errors: {}",
                messages.join("; ")
            )));
        }
        response
            .data
            .ok_or_else(|| ApiError::InvalidResponse("graphql response without data".into()))
    }

    /// Submit a bulk query. The returned operation is usually CREATED.
    pub async fn run_bulk_query(&self, query: &str) -> Result<BulkOperation, SyncError> {
        let data: BulkRunData = self
            .graphql(BULK_RUN_MUTATION, json!({ "query": query }))
            .await?;
        let payload = data.bulk_operation_run_query;

        if !payload.user_errors.is_empty() {
            return Err(BulkOperationError::Rejected {
                messages: payload.user_errors.iter().map(UserError::describe).collect(),
            }
            .into());
        }
        payload.bulk_operation.ok_or_else(|| {
            ApiError::InvalidResponse("bulkOperationRunQuery returned no operation".into()).into()
        })
    }

    pub async fn bulk_operation(&self, id: &str) -> Result<BulkOperation, ApiError> {
        let data: NodeData = self
            .graphql(BULK_OPERATION_QUERY, json!({ "id": id }))
            .await?;
        data.node
            .ok_or_else(|| ApiError::InvalidResponse(format!("bulk operation {id} not found")))
    }

    /// Stream a JSONL result file, passing each non-empty line to `on_line`.
    /// Returns the number of lines delivered.
    pub async fn download_lines<F>(&self, url: &str, mut on_line: F) -> Result<usize, ApiError>
    where
        F: FnMut(&str),
    {
        let response =
            send_with_retry(&self.http, |c| c.get(url), self.max_retries, self.clock.as_ref())
                .await?;

        let mut delivered = 0;
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                delivered += emit_line(&line, &mut on_line)?;
            }
        }
        if !buffer.is_empty() {
            delivered += emit_line(&buffer, &mut on_line)?;
        }
        Ok(delivered)
    }
}

fn emit_line<F: FnMut(&str)>(line: &[u8], on_line: &mut F) -> Result<usize, ApiError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| ApiError::InvalidResponse(format!("invalid UTF-8 in bulk result: {e}")))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    on_line(text);
    Ok(1)
}
