use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopsync_common::error::ShopsyncError;
use shopsync_common::Platform;
use uuid::Uuid;

/// Metadata flag asking for a HISTORICAL_INIT follow-up after an incremental run.
pub const AUTO_FOLLOW_UP_KEY: &str = "auto_historical_follow_up";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    HistoricalInit,
    HistoricalRebuild,
    Incremental,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::HistoricalInit => "HISTORICAL_INIT",
            JobType::HistoricalRebuild => "HISTORICAL_REBUILD",
            JobType::Incremental => "INCREMENTAL",
        }
    }

    /// Full backfill, unbounded by the stored watermark.
    pub fn is_historical(&self) -> bool {
        !matches!(self, JobType::Incremental)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ShopsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HISTORICAL_INIT" => Ok(JobType::HistoricalInit),
            "HISTORICAL_REBUILD" => Ok(JobType::HistoricalRebuild),
            "INCREMENTAL" => Ok(JobType::Incremental),
            other => Err(ShopsyncError::Validation(format!("unknown job type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// QUEUED -> IN_PROGRESS -> {SUCCEEDED, FAILED}. IN_PROGRESS -> QUEUED is
    /// only taken by the stale-job sweeper.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Succeeded)
                | (JobStatus::InProgress, JobStatus::Failed)
                | (JobStatus::InProgress, JobStatus::Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ShopsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(ShopsyncError::Validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Failure payload persisted into `sync_jobs.error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
    /// Step of the run that failed (`resolve_credentials`, `sync`, ...).
    pub task: String,
    /// Rendered cause chain, one cause per line.
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub shop_id: String,
    pub platform: Platform,
    pub job_type: JobType,
    pub status: JobStatus,
    pub metadata: serde_json::Value,
    pub error: Option<JobError>,
    pub records_synced: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    /// Whether the trigger asked for an automatic HISTORICAL_INIT after this run.
    pub fn auto_follow_up(&self) -> bool {
        self.metadata
            .get(AUTO_FOLLOW_UP_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSyncJob {
    pub shop_id: String,
    pub platform: Platform,
    pub job_type: JobType,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

impl NewSyncJob {
    pub fn new(shop_id: impl Into<String>, platform: Platform, job_type: JobType) -> Self {
        Self {
            shop_id: shop_id.into(),
            platform,
            job_type,
            metadata: empty_metadata(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn into_job(self, id: Uuid, now: DateTime<Utc>) -> SyncJob {
        SyncJob {
            id,
            shop_id: self.shop_id,
            platform: self.platform,
            job_type: self.job_type,
            status: JobStatus::Queued,
            metadata: self.metadata,
            error: None,
            records_synced: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

fn empty_metadata() -> serde_json::Value {
    serde_json::json!({})
}

/// Terminal outcome handed to `JobQueue::complete`.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub status: JobStatus,
    pub records_synced: Option<i64>,
    pub error: Option<JobError>,
}

impl JobCompletion {
    pub fn succeeded(records_synced: i64) -> Self {
        Self {
            status: JobStatus::Succeeded,
            records_synced: Some(records_synced),
            error: None,
        }
    }

    pub fn failed(error: JobError) -> Self {
        Self {
            status: JobStatus::Failed,
            records_synced: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_transitions_are_allowed() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Queued));
        assert!(!Succeeded.can_transition_to(InProgress));
    }

    #[test]
    fn historical_types() {
        assert!(JobType::HistoricalInit.is_historical());
        assert!(JobType::HistoricalRebuild.is_historical());
        assert!(!JobType::Incremental.is_historical());
    }

    #[test]
    fn status_and_type_parse_their_own_output() {
        for s in [
            JobStatus::Queued,
            JobStatus::InProgress,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
        assert_eq!(
            "HISTORICAL_REBUILD".parse::<JobType>().unwrap(),
            JobType::HistoricalRebuild
        );
    }

    #[test]
    fn auto_follow_up_reads_metadata_flag() {
        let job = NewSyncJob::new("acme", Platform::Shopify, JobType::Incremental)
            .with_metadata(serde_json::json!({ "auto_historical_follow_up": true }))
            .into_job(Uuid::new_v4(), Utc::now());
        assert!(job.auto_follow_up());

        let plain = NewSyncJob::new("acme", Platform::Shopify, JobType::Incremental)
            .into_job(Uuid::new_v4(), Utc::now());
        assert!(!plain.auto_follow_up());
    }

    #[test]
    fn new_job_deserializes_without_metadata() {
        let json = r#"{"shop_id":"acme","platform":"META","job_type":"INCREMENTAL"}"#;
        let job: NewSyncJob = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(job.platform, Platform::Meta);
        assert_eq!(job.metadata, serde_json::json!({}));
    }
}
