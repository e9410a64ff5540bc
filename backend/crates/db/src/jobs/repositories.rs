use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::models::{JobCompletion, NewSyncJob, SyncJob};
use shopsync_common::error::ShopsyncResult;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a QUEUED job. Returns `None` when a job for the same
    /// shop/platform/type is already queued (benign duplicate).
    async fn enqueue(&self, job: NewSyncJob) -> ShopsyncResult<Option<SyncJob>>;

    async fn get(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>>;

    /// Oldest QUEUED job by `created_at`. Does not claim it.
    async fn next_queued(&self) -> ShopsyncResult<Option<SyncJob>>;

    /// Atomically move a job from QUEUED to IN_PROGRESS, stamping `started_at`.
    /// Returns `false` when the job is not QUEUED (already claimed or missing).
    async fn claim(&self, id: Uuid) -> ShopsyncResult<bool>;

    /// Terminal transition, stamping `completed_at`. Accepted while the job is
    /// IN_PROGRESS, or again with the same terminal status (last write wins).
    async fn complete(&self, id: Uuid, completion: JobCompletion) -> ShopsyncResult<SyncJob>;

    /// Queue a HISTORICAL_INIT for the trigger's shop/platform if the trigger was
    /// an INCREMENTAL job that asked for one and no backfill is already pending.
    async fn enqueue_follow_up(&self, trigger: &SyncJob) -> ShopsyncResult<Option<SyncJob>>;

    /// Reset IN_PROGRESS jobs started more than `older_than` ago back to QUEUED.
    /// Returns the number of jobs requeued.
    async fn requeue_stale(&self, older_than: Duration) -> ShopsyncResult<u64>;

    /// Most recent jobs for a shop, newest first.
    async fn list_for_shop(&self, shop_id: &str, limit: i64) -> ShopsyncResult<Vec<SyncJob>>;
}
