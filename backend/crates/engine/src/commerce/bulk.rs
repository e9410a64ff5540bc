use super::client::ShopifyClient;
use super::models::BulkOperationStatus;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::retry::{PollExhausted, PollStatus, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum BulkOperationError {
    #[error("bulk operation failed with error code {}", code.as_deref().unwrap_or("UNKNOWN"))]
    Failed { code: Option<String> },

    #[error("bulk operation was canceled")]
    Canceled,

    #[error("bulk operation still running after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("bulk operation rejected: {}", messages.join("; "))]
    Rejected { messages: Vec<String> },
}

impl BulkOperationError {
    pub fn code(&self) -> &'static str {
        match self {
            BulkOperationError::Failed { .. } => "BULK_OPERATION_FAILED",
            BulkOperationError::Canceled => "BULK_OPERATION_CANCELED",
            BulkOperationError::Timeout { .. } => "BULK_OPERATION_TIMEOUT",
            BulkOperationError::Rejected { .. } => "BULK_OPERATION_REJECTED",
        }
    }
}

impl From<PollExhausted> for SyncError {
    fn from(e: PollExhausted) -> Self {
        SyncError::Bulk(BulkOperationError::Timeout {
            attempts: e.attempts,
        })
    }
}

/// Terminal state of a completed bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkResult {
    pub url: Option<String>,
    pub object_count: u64,
}

impl BulkResult {
    /// Completed without anything to download.
    pub fn is_empty(&self) -> bool {
        self.object_count == 0 || self.url.is_none()
    }
}

/// Submit `query` as a bulk operation and poll it to a terminal state.
pub async fn run_bulk(
    client: &ShopifyClient,
    query: &str,
    policy: &RetryPolicy,
    clock: &dyn Clock,
) -> Result<BulkResult, SyncError> {
    let submitted = client.run_bulk_query(query).await?;
    tracing::info!(operation_id = %submitted.id, "bulk operation submitted");

    let id = submitted.id;
    let polled: Result<BulkResult, SyncError> = policy
        .poll(clock, |attempt| {
            let id = id.clone();
            async move {
                let op = client.bulk_operation(&id).await?;
                tracing::debug!(
                    operation_id = %id,
                    attempt,
                    status = %op.status,
                    object_count = op.object_count,
                    "polled bulk operation"
                );
                match op.status {
                    BulkOperationStatus::Completed => Ok(PollStatus::Ready(BulkResult {
                        url: op.url,
                        object_count: op.object_count,
                    })),
                    BulkOperationStatus::Failed | BulkOperationStatus::Expired => {
                        Err(BulkOperationError::Failed {
                            code: op.error_code,
                        }
                        .into())
                    }
                    BulkOperationStatus::Canceled => Err(BulkOperationError::Canceled.into()),
                    _ => Ok(PollStatus::Pending),
                }
            }
        })
        .await;
    let result = polled?;

    tracing::info!(
        operation_id = %id,
        object_count = result.object_count,
        has_url = result.url.is_some(),
        "bulk operation completed"
    );
    Ok(result)
}
