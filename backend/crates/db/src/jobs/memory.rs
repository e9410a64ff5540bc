use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::jobs::models::{JobCompletion, JobError, JobStatus, JobType, NewSyncJob, SyncJob};
use crate::jobs::repositories::JobQueue;
use crate::lock_poisoned;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};

/// In-memory job queue for tests and local runs.
///
/// Jobs are kept in insertion order, which doubles as creation order.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<SyncJob>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored job, in creation order.
    pub fn snapshot(&self) -> ShopsyncResult<Vec<SyncJob>> {
        Ok(self.jobs.lock().map_err(lock_poisoned)?.clone())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: NewSyncJob) -> ShopsyncResult<Option<SyncJob>> {
        let mut jobs = self.jobs.lock().map_err(lock_poisoned)?;
        let duplicate = jobs.iter().any(|j| {
            j.status == JobStatus::Queued
                && j.shop_id == job.shop_id
                && j.platform == job.platform
                && j.job_type == job.job_type
        });
        if duplicate {
            return Ok(None);
        }
        let job = job.into_job(Uuid::new_v4(), Utc::now());
        jobs.push(job.clone());
        Ok(Some(job))
    }

    async fn get(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>> {
        let jobs = self.jobs.lock().map_err(lock_poisoned)?;
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn next_queued(&self) -> ShopsyncResult<Option<SyncJob>> {
        let jobs = self.jobs.lock().map_err(lock_poisoned)?;
        Ok(jobs.iter().find(|j| j.status == JobStatus::Queued).cloned())
    }

    async fn claim(&self, id: Uuid) -> ShopsyncResult<bool> {
        let mut jobs = self.jobs.lock().map_err(lock_poisoned)?;
        match jobs
            .iter_mut()
            .find(|j| j.id == id && j.status == JobStatus::Queued)
        {
            Some(job) => {
                job.status = JobStatus::InProgress;
                job.started_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete(&self, id: Uuid, completion: JobCompletion) -> ShopsyncResult<SyncJob> {
        if !completion.status.is_terminal() {
            return Err(ShopsyncError::Validation(format!(
                "cannot complete job {id} with non-terminal status {}",
                completion.status
            )));
        }
        let mut jobs = self.jobs.lock().map_err(lock_poisoned)?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ShopsyncError::NotFound(format!("sync job {id}")))?;

        if job.status != JobStatus::InProgress && job.status != completion.status {
            return Err(ShopsyncError::Conflict(format!(
                "job {id} is {} and cannot become {}",
                job.status, completion.status
            )));
        }

        job.status = completion.status;
        job.records_synced = completion.records_synced;
        job.error = completion.error;
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn enqueue_follow_up(&self, trigger: &SyncJob) -> ShopsyncResult<Option<SyncJob>> {
        if trigger.job_type != JobType::Incremental || !trigger.auto_follow_up() {
            return Ok(None);
        }
        let mut jobs = self.jobs.lock().map_err(lock_poisoned)?;
        let pending = jobs.iter().any(|j| {
            j.shop_id == trigger.shop_id
                && j.platform == trigger.platform
                && j.job_type == JobType::HistoricalInit
                && matches!(j.status, JobStatus::Queued | JobStatus::InProgress)
        });
        if pending {
            return Ok(None);
        }
        let job = NewSyncJob::new(&trigger.shop_id, trigger.platform, JobType::HistoricalInit)
            .with_metadata(serde_json::json!({ "triggered_by": trigger.id }))
            .into_job(Uuid::new_v4(), Utc::now());
        jobs.push(job.clone());
        Ok(Some(job))
    }

    async fn requeue_stale(&self, older_than: Duration) -> ShopsyncResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| ShopsyncError::Validation(e.to_string()))?;
        let mut jobs = self.jobs.lock().map_err(lock_poisoned)?;

        let mut stale: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                j.status == JobStatus::InProgress && j.started_at.is_some_and(|t| t <= cutoff)
            })
            .map(|(i, _)| i)
            .collect();
        // Oldest claim first, so it is the one that returns to the queue.
        stale.sort_by_key(|&i| jobs[i].started_at);

        let mut requeued = 0;
        for i in stale {
            let has_queued_twin = jobs.iter().any(|q| {
                q.status == JobStatus::Queued
                    && q.shop_id == jobs[i].shop_id
                    && q.platform == jobs[i].platform
                    && q.job_type == jobs[i].job_type
            });
            let job = &mut jobs[i];
            if has_queued_twin {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.error = Some(JobError {
                    code: "STALE_JOB_SUPERSEDED".to_string(),
                    message: "job was abandoned in progress and an equivalent job is already queued"
                        .to_string(),
                    task: "requeue_stale".to_string(),
                    stack: None,
                });
            } else {
                job.status = JobStatus::Queued;
                job.started_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn list_for_shop(&self, shop_id: &str, limit: i64) -> ShopsyncResult<Vec<SyncJob>> {
        let jobs = self.jobs.lock().map_err(lock_poisoned)?;
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| j.shop_id == shop_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopsync_common::Platform;
    use std::sync::Arc;

    fn incremental(shop: &str) -> NewSyncJob {
        NewSyncJob::new(shop, Platform::Shopify, JobType::Incremental)
    }

    #[tokio::test]
    async fn next_queued_returns_oldest_first() {
        let queue = InMemoryJobQueue::new();
        let a = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        let b = queue.enqueue(incremental("b")).await.unwrap().unwrap();

        assert_eq!(queue.next_queued().await.unwrap().unwrap().id, a.id);
        queue.claim(a.id).await.unwrap();
        assert_eq!(queue.next_queued().await.unwrap().unwrap().id, b.id);
    }

    #[tokio::test]
    async fn next_queued_does_not_claim() {
        let queue = InMemoryJobQueue::new();
        let a = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        queue.next_queued().await.unwrap();
        let stored = queue.get(a.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_of_many_concurrent_claims_wins() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let job = queue.enqueue(incremental("acme")).await.unwrap().unwrap();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move { q.claim(job.id).await.unwrap() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claim_unknown_job_is_false() {
        let queue = InMemoryJobQueue::new();
        assert!(!queue.claim(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn complete_requires_claim() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        let err = queue
            .complete(job.id, JobCompletion::succeeded(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ShopsyncError::Conflict(_)));
    }

    #[tokio::test]
    async fn complete_rejects_non_terminal_status() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        queue.claim(job.id).await.unwrap();
        let completion = JobCompletion {
            status: JobStatus::Queued,
            records_synced: None,
            error: None,
        };
        let err = queue.complete(job.id, completion).await.unwrap_err();
        assert!(matches!(err, ShopsyncError::Validation(_)));
    }

    #[tokio::test]
    async fn terminal_state_cannot_flip() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        queue.claim(job.id).await.unwrap();
        queue
            .complete(job.id, JobCompletion::succeeded(5))
            .await
            .unwrap();

        let rewrite = queue
            .complete(job.id, JobCompletion::succeeded(6))
            .await
            .unwrap();
        assert_eq!(rewrite.records_synced, Some(6));

        let flip = queue
            .complete(
                job.id,
                JobCompletion::failed(JobError {
                    code: "X".into(),
                    message: "x".into(),
                    task: "sync".into(),
                    stack: None,
                }),
            )
            .await;
        assert!(flip.is_err());
        assert!(!queue.claim(job.id).await.unwrap());
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn duplicate_queued_job_is_ignored_but_allowed_after_claim() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        assert!(queue.enqueue(incremental("a")).await.unwrap().is_none());

        queue.claim(first.id).await.unwrap();
        assert!(queue.enqueue(incremental("a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn follow_up_only_for_flagged_incremental_jobs() {
        let queue = InMemoryJobQueue::new();
        let plain = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        assert!(queue.enqueue_follow_up(&plain).await.unwrap().is_none());

        let historical = queue
            .enqueue(
                NewSyncJob::new("b", Platform::Shopify, JobType::HistoricalRebuild)
                    .with_metadata(serde_json::json!({ "auto_historical_follow_up": true })),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(queue.enqueue_follow_up(&historical).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn follow_up_skipped_while_backfill_pending() {
        let queue = InMemoryJobQueue::new();
        let flagged = incremental("acme")
            .with_metadata(serde_json::json!({ "auto_historical_follow_up": true }));
        let trigger = queue.enqueue(flagged).await.unwrap().unwrap();

        let follow_up = queue.enqueue_follow_up(&trigger).await.unwrap().unwrap();
        assert_eq!(follow_up.job_type, JobType::HistoricalInit);
        assert_eq!(follow_up.metadata["triggered_by"], trigger.id.to_string());

        // Still queued.
        assert!(queue.enqueue_follow_up(&trigger).await.unwrap().is_none());

        // In progress also blocks.
        queue.claim(follow_up.id).await.unwrap();
        assert!(queue.enqueue_follow_up(&trigger).await.unwrap().is_none());

        // Finished backfills do not.
        queue
            .complete(follow_up.id, JobCompletion::succeeded(0))
            .await
            .unwrap();
        assert!(queue.enqueue_follow_up(&trigger).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn requeue_stale_resets_in_progress_jobs() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        queue.claim(job.id).await.unwrap();

        assert_eq!(queue.requeue_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.requeue_stale(Duration::ZERO).await.unwrap(), 1);

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.started_at.is_none());
        assert!(queue.claim(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn requeue_stale_fails_job_with_queued_twin() {
        let queue = InMemoryJobQueue::new();
        let stuck = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        queue.claim(stuck.id).await.unwrap();
        let twin = queue.enqueue(incremental("a")).await.unwrap().unwrap();

        assert_eq!(queue.requeue_stale(Duration::ZERO).await.unwrap(), 0);
        let stored = queue.get(stuck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.unwrap().code, "STALE_JOB_SUPERSEDED");
        let twin = queue.get(twin.id).await.unwrap().unwrap();
        assert_eq!(twin.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn requeue_stale_returns_only_the_oldest_of_stale_twins() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        queue.claim(first.id).await.unwrap();
        let second = queue.enqueue(incremental("a")).await.unwrap().unwrap();
        queue.claim(second.id).await.unwrap();
        {
            // The later insert holds the older claim.
            let mut jobs = queue.jobs.lock().unwrap();
            for job in jobs.iter_mut() {
                let hours = if job.id == second.id { 3 } else { 2 };
                job.started_at = Some(Utc::now() - chrono::Duration::hours(hours));
            }
        }

        assert_eq!(queue.requeue_stale(Duration::from_secs(3600)).await.unwrap(), 1);
        let older = queue.get(second.id).await.unwrap().unwrap();
        let newer = queue.get(first.id).await.unwrap().unwrap();
        assert_eq!(older.status, JobStatus::Queued);
        assert_eq!(newer.status, JobStatus::Failed);
        assert_eq!(newer.error.unwrap().code, "STALE_JOB_SUPERSEDED");
    }

    #[tokio::test]
    async fn list_for_shop_is_newest_first() {
        let queue = InMemoryJobQueue::new();
        let a = queue.enqueue(incremental("acme")).await.unwrap().unwrap();
        queue.claim(a.id).await.unwrap();
        let b = queue.enqueue(incremental("acme")).await.unwrap().unwrap();
        queue.enqueue(incremental("other")).await.unwrap();

        let listed = queue.list_for_shop("acme", 10).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        assert_eq!(queue.list_for_shop("acme", 1).await.unwrap().len(), 1);
    }
}
