use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::jobs::models::{JobCompletion, JobError, JobStatus, JobType, NewSyncJob, SyncJob};
use crate::jobs::repositories::JobQueue;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};

const JOB_COLUMNS: &str = "id, shop_id, platform, job_type, status, metadata, error, \
     records_synced, created_at, started_at, completed_at";

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> ShopsyncResult<SyncJob> {
        let error: Option<serde_json::Value> = row.get("error");
        let error = error
            .map(serde_json::from_value::<JobError>)
            .transpose()
            .map_err(|e| ShopsyncError::Database(format!("malformed job error payload: {e}")))?;

        Ok(SyncJob {
            id: row.get("id"),
            shop_id: row.get("shop_id"),
            platform: row.get::<String, _>("platform").parse()?,
            job_type: row.get::<String, _>("job_type").parse()?,
            status: row.get::<String, _>("status").parse()?,
            metadata: row.get("metadata"),
            error,
            records_synced: row.get("records_synced"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

fn db_err(e: sqlx::Error) -> ShopsyncError {
    ShopsyncError::Database(e.to_string())
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: NewSyncJob) -> ShopsyncResult<Option<SyncJob>> {
        let row = sqlx::query(&format!(
            "insert into sync_jobs (id, shop_id, platform, job_type, status, metadata, created_at)
             values ($1, $2, $3, $4, 'QUEUED', $5, $6)
             on conflict (shop_id, platform, job_type) where status = 'QUEUED' do nothing
             returning {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&job.shop_id)
        .bind(job.platform.as_str())
        .bind(job.job_type.as_str())
        .bind(&job.metadata)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Self::map_row).transpose()
    }

    async fn get(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>> {
        let row = sqlx::query(&format!("select {JOB_COLUMNS} from sync_jobs where id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(Self::map_row).transpose()
    }

    async fn next_queued(&self) -> ShopsyncResult<Option<SyncJob>> {
        let row = sqlx::query(&format!(
            "select {JOB_COLUMNS} from sync_jobs
             where status = 'QUEUED'
             order by created_at, id
             limit 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Self::map_row).transpose()
    }

    async fn claim(&self, id: Uuid) -> ShopsyncResult<bool> {
        let result = sqlx::query(
            "update sync_jobs
             set status = 'IN_PROGRESS', started_at = $2
             where id = $1 and status = 'QUEUED'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: Uuid, completion: JobCompletion) -> ShopsyncResult<SyncJob> {
        if !completion.status.is_terminal() {
            return Err(ShopsyncError::Validation(format!(
                "cannot complete job {id} with non-terminal status {}",
                completion.status
            )));
        }

        let error = completion
            .error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ShopsyncError::Internal(e.to_string()))?;

        let row = sqlx::query(&format!(
            "update sync_jobs
             set status = $2, records_synced = $3, error = $4, completed_at = $5
             where id = $1 and (status = 'IN_PROGRESS' or status = $2)
             returning {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(completion.status.as_str())
        .bind(completion.records_synced)
        .bind(error)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(r) => Self::map_row(r),
            None => match self.get(id).await? {
                Some(job) => Err(ShopsyncError::Conflict(format!(
                    "job {id} is {} and cannot become {}",
                    job.status, completion.status
                ))),
                None => Err(ShopsyncError::NotFound(format!("sync job {id}"))),
            },
        }
    }

    async fn enqueue_follow_up(&self, trigger: &SyncJob) -> ShopsyncResult<Option<SyncJob>> {
        if trigger.job_type != JobType::Incremental || !trigger.auto_follow_up() {
            return Ok(None);
        }

        let metadata = serde_json::json!({ "triggered_by": trigger.id });
        let row = sqlx::query(&format!(
            "insert into sync_jobs (id, shop_id, platform, job_type, status, metadata, created_at)
             select $1, $2, $3, 'HISTORICAL_INIT', 'QUEUED', $4, $5
             where not exists (
               select 1 from sync_jobs
               where shop_id = $2 and platform = $3 and job_type = 'HISTORICAL_INIT'
                 and status in ('QUEUED', 'IN_PROGRESS')
             )
             on conflict (shop_id, platform, job_type) where status = 'QUEUED' do nothing
             returning {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&trigger.shop_id)
        .bind(trigger.platform.as_str())
        .bind(metadata)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Self::map_row).transpose()
    }

    async fn requeue_stale(&self, older_than: Duration) -> ShopsyncResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| ShopsyncError::Validation(e.to_string()))?;
        let superseded = serde_json::json!({
            "code": "STALE_JOB_SUPERSEDED",
            "message": "job was abandoned in progress and an equivalent job is already queued",
            "task": "requeue_stale",
            "stack": null
        });

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // A queued twin would collide with the pending-job unique index.
        sqlx::query(
            "update sync_jobs s
             set status = 'FAILED', error = $2, completed_at = now()
             where s.status = 'IN_PROGRESS' and s.started_at < $1
               and exists (
                 select 1 from sync_jobs q
                 where q.status = 'QUEUED' and q.shop_id = s.shop_id
                   and q.platform = s.platform and q.job_type = s.job_type
               )",
        )
        .bind(cutoff)
        .bind(superseded.clone())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Stale twins of one key: only the oldest claim goes back on the queue.
        sqlx::query(
            "update sync_jobs s
             set status = 'FAILED', error = $2, completed_at = now()
             where s.status = 'IN_PROGRESS' and s.started_at < $1
               and s.id not in (
                 select distinct on (shop_id, platform, job_type) id
                 from sync_jobs
                 where status = 'IN_PROGRESS' and started_at < $1
                 order by shop_id, platform, job_type, started_at, id
               )",
        )
        .bind(cutoff)
        .bind(superseded)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let requeued = sqlx::query(
            "update sync_jobs
             set status = 'QUEUED', started_at = null
             where status = 'IN_PROGRESS' and started_at < $1",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(requeued.rows_affected())
    }

    async fn list_for_shop(&self, shop_id: &str, limit: i64) -> ShopsyncResult<Vec<SyncJob>> {
        let rows = sqlx::query(&format!(
            "select {JOB_COLUMNS} from sync_jobs
             where shop_id = $1
             order by created_at desc, id desc
             limit $2"
        ))
        .bind(shop_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Self::map_row).collect()
    }
}
