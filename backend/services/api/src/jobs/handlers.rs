use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shopsync_common::error::ShopsyncError;
use shopsync_common::Platform;
use shopsync_db::jobs::models::{JobType, NewSyncJob};
use shopsync_engine::credentials::CredentialError;
use shopsync_engine::TriggerOutcome;
use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs::requests::{CreateJobRequest, ListJobsQuery};
use crate::jobs::responses::{DuplicateJobResponse, JobResponse, ListJobsResponse};
use crate::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

pub async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobRequest>,
) -> Result<Response, ApiError> {
    let shop_id = body.shop_id.trim();
    if shop_id.is_empty() {
        return Err(ApiError(ShopsyncError::Validation(
            "shop_id must not be empty".to_string(),
        )));
    }
    let platform: Platform = body.platform.parse()?;
    let job_type: JobType = body.job_type.parse()?;

    let mut new = NewSyncJob::new(shop_id, platform, job_type);
    if let Some(metadata) = body.metadata {
        if !metadata.is_object() {
            return Err(ApiError(ShopsyncError::Validation(
                "metadata must be a JSON object".to_string(),
            )));
        }
        new = new.with_metadata(metadata);
    }

    let usable = state
        .credentials
        .platforms_for_shop(shop_id)
        .await
        .map_err(|e| match e {
            CredentialError::Store(e) => ApiError(e),
            other => ApiError(ShopsyncError::Validation(other.to_string())),
        })?;
    if !usable.contains(&platform) {
        return Err(ApiError(ShopsyncError::Validation(format!(
            "shop {shop_id} has no usable {platform} credential"
        ))));
    }

    match state.queue.enqueue(new).await? {
        Some(job) => {
            tracing::info!(
                job_id = %job.id,
                shop_id = %job.shop_id,
                platform = %job.platform,
                job_type = %job.job_type,
                "job enqueued"
            );
            Ok((StatusCode::CREATED, Json(JobResponse { data: job })).into_response())
        }
        None => Ok((
            StatusCode::OK,
            Json(DuplicateJobResponse {
                data: None,
                duplicate: true,
            }),
        )
            .into_response()),
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .queue
        .get(id)
        .await?
        .ok_or_else(|| ApiError(ShopsyncError::NotFound(format!("job not found: {id}"))))?;
    Ok(Json(JobResponse { data: job }))
}

pub async fn list_shop_jobs(
    State(state): State<AppState>,
    Path(shop_id): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let data = state.queue.list_for_shop(&shop_id, limit).await?;
    let count = data.len();
    Ok(Json(ListJobsResponse { data, count }))
}

/// Claim the job and run it inline; 409 when it is no longer QUEUED.
pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    match state.runner.trigger(id).await? {
        TriggerOutcome::Finished(job) => Ok(Json(JobResponse { data: job })),
        TriggerOutcome::Conflict => Err(ApiError(ShopsyncError::Conflict(format!(
            "job {id} is not queued"
        )))),
    }
}
