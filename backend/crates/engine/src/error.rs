use std::error::Error as StdError;

use crate::commerce::bulk::BulkOperationError;
use crate::credentials::CredentialError;
use crate::http::ApiError;
use shopsync_common::error::ShopsyncError;
use shopsync_common::Platform;
use shopsync_db::jobs::models::JobError;

/// Everything that can abort a job run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("platform API error: {0}")]
    Api(#[from] ApiError),

    #[error("bulk operation error: {0}")]
    Bulk(#[from] BulkOperationError),

    #[error("store error: {0}")]
    Store(#[from] ShopsyncError),

    #[error("no sync driver registered for platform {0}")]
    UnsupportedPlatform(Platform),

    #[error("missing credential metadata: {0}")]
    MissingMetadata(String),
}

impl SyncError {
    /// Stable code persisted in the job's error payload.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Credential(e) => e.code(),
            SyncError::Api(ApiError::HttpError { .. }) => "API_HTTP_ERROR",
            SyncError::Api(ApiError::MaxRetriesExceeded { .. }) => "API_RETRIES_EXHAUSTED",
            SyncError::Api(ApiError::InvalidResponse(_)) => "API_INVALID_RESPONSE",
            SyncError::Api(ApiError::RequestError(_)) => "API_REQUEST_ERROR",
            SyncError::Bulk(e) => e.code(),
            SyncError::Store(_) => "STORE_ERROR",
            SyncError::UnsupportedPlatform(_) => "UNSUPPORTED_PLATFORM",
            SyncError::MissingMetadata(_) => "MISSING_METADATA",
        }
    }

    /// The platform refused the access token.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(
            self,
            SyncError::Api(ApiError::HttpError { status, .. })
                if status.as_u16() == 401 || status.as_u16() == 403
        )
    }

    /// Error payload for a job that failed during `task`.
    pub fn to_job_error(&self, task: &str) -> JobError {
        JobError {
            code: self.code().to_string(),
            message: self.to_string(),
            task: task.to_string(),
            stack: render_chain(self),
        }
    }
}

/// Causes below the top-level error, one per line.
fn render_chain(err: &dyn StdError) -> Option<String> {
    let mut lines = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
