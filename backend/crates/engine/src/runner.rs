use std::sync::Arc;

use uuid::Uuid;

use crate::credentials::CredentialResolver;
use crate::driver::{DriverRegistry, SyncContext, SyncResult};
use crate::error::SyncError;
use shopsync_common::error::ShopsyncError;
use shopsync_db::cursors::repositories::CursorStore;
use shopsync_db::jobs::models::{JobCompletion, SyncJob};
use shopsync_db::jobs::repositories::JobQueue;

/// Result of a manual trigger.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// The job was not QUEUED (already claimed, finished, or unknown).
    Conflict,
    /// The job was claimed and ran to a terminal state.
    Finished(SyncJob),
}

/// Runs one claimed job end to end and records the outcome on the job.
pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    cursors: Arc<dyn CursorStore>,
    credentials: Arc<dyn CredentialResolver>,
    registry: DriverRegistry,
}

impl JobRunner {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        cursors: Arc<dyn CursorStore>,
        credentials: Arc<dyn CredentialResolver>,
        registry: DriverRegistry,
    ) -> Self {
        Self {
            queue,
            cursors,
            credentials,
            registry,
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    async fn run_tasks(&self, job: &SyncJob) -> Result<SyncResult, (&'static str, SyncError)> {
        let credential = self
            .credentials
            .resolve(&job.shop_id, job.platform)
            .await
            .map_err(|e| ("resolve_credentials", e.into()))?;

        let cursor = self
            .cursors
            .get(&job.shop_id, job.platform)
            .await
            .map_err(|e| ("read_cursor", e.into()))?;

        let driver = self.registry.get(job.platform).map_err(|e| ("sync", e))?;
        let ctx = SyncContext {
            job: job.clone(),
            credential,
            cursor,
        };
        let result = match driver.sync(&ctx).await {
            Ok(result) => result,
            Err(e) => {
                if e.is_auth_rejected() {
                    // Force the next run to re-read a possibly rotated token.
                    self.credentials.invalidate_shop(&job.shop_id).await;
                }
                return Err(("sync", e));
            }
        };

        if let Some(watermark) = &result.watermark {
            let cursor = self
                .cursors
                .advance(&job.shop_id, job.platform, watermark.clone())
                .await
                .map_err(|e| ("advance_cursor", e.into()))?;
            tracing::info!(
                job_id = %job.id,
                watermark = %cursor.watermark,
                "cursor advanced"
            );
        }
        Ok(result)
    }

    /// Run a job that has already been claimed.
    ///
    /// On success the job is completed SUCCEEDED and any requested follow-up
    /// backfill is queued. On failure the job is completed FAILED with the
    /// error payload, and the error is returned.
    pub async fn execute(&self, job: &SyncJob) -> Result<SyncJob, SyncError> {
        tracing::info!(
            job_id = %job.id,
            shop_id = %job.shop_id,
            platform = %job.platform,
            job_type = %job.job_type,
            "running job"
        );

        let (task, err) = match self.run_tasks(job).await {
            Ok(result) => {
                let synced = i64::try_from(result.records_synced).unwrap_or(i64::MAX);
                match self
                    .queue
                    .complete(job.id, JobCompletion::succeeded(synced))
                    .await
                {
                    Ok(completed) => {
                        tracing::info!(
                            job_id = %job.id,
                            records_synced = result.records_synced,
                            records_promoted = result.records_promoted,
                            skipped = result.skipped,
                            errors = result.errors,
                            "job succeeded"
                        );
                        self.follow_up(&completed).await;
                        return Ok(completed);
                    }
                    Err(e) => ("complete", SyncError::from(e)),
                }
            }
            Err(failure) => failure,
        };

        tracing::error!(
            job_id = %job.id,
            task,
            code = err.code(),
            error = %err,
            "job failed"
        );
        if let Err(e) = self
            .queue
            .complete(job.id, JobCompletion::failed(err.to_job_error(task)))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job failure");
        }
        Err(err)
    }

    async fn follow_up(&self, completed: &SyncJob) {
        match self.queue.enqueue_follow_up(completed).await {
            Ok(Some(queued)) => tracing::info!(
                job_id = %completed.id,
                follow_up_id = %queued.id,
                "queued historical follow-up"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                job_id = %completed.id,
                error = %e,
                "failed to queue historical follow-up"
            ),
        }
    }

    /// Claim a specific job and run it synchronously.
    pub async fn trigger(&self, job_id: Uuid) -> Result<TriggerOutcome, ShopsyncError> {
        if !self.queue.claim(job_id).await? {
            return Ok(TriggerOutcome::Conflict);
        }
        let job = self
            .queue
            .get(job_id)
            .await?
            .ok_or_else(|| ShopsyncError::NotFound(format!("job {job_id}")))?;

        if let Err(e) = self.execute(&job).await {
            tracing::debug!(job_id = %job_id, error = %e, "triggered job failed");
        }
        let finished = self
            .queue
            .get(job_id)
            .await?
            .ok_or_else(|| ShopsyncError::NotFound(format!("job {job_id}")))?;
        Ok(TriggerOutcome::Finished(finished))
    }
}
