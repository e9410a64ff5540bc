use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::runner::JobRunner;
use shopsync_db::jobs::models::{JobStatus, SyncJob};

/// What one pass of the worker loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing queued, or the queue could not be read.
    Idle,
    /// Another worker claimed the job first.
    LostRace(Uuid),
    /// The job was claimed and ran to the given terminal status.
    Processed(Uuid, JobStatus),
}

/// Polls the queue and runs jobs one at a time.
pub struct Worker {
    runner: Arc<JobRunner>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    stale_timeout: Option<Duration>,
    last_sweep: Option<DateTime<Utc>>,
}

impl Worker {
    pub fn new(runner: Arc<JobRunner>, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            runner,
            clock,
            poll_interval,
            stale_timeout: None,
            last_sweep: None,
        }
    }

    /// Requeue IN_PROGRESS jobs older than `timeout`, checked every `timeout / 4`.
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = Some(timeout);
        self
    }

    /// Run forever: process jobs back to back and sleep when the queue is empty.
    pub async fn run(&mut self) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            stale_timeout_secs = self.stale_timeout.map(|t| t.as_secs()),
            "worker started"
        );
        loop {
            match self.tick().await {
                Tick::Idle => self.clock.sleep(self.poll_interval).await,
                Tick::LostRace(_) | Tick::Processed(..) => {}
            }
        }
    }

    /// Sweep if due, then try to claim and run the oldest queued job.
    pub async fn tick(&mut self) -> Tick {
        self.sweep_if_due().await;

        let queue = self.runner.queue();
        let mut job: SyncJob = match queue.next_queued().await {
            Ok(Some(job)) => job,
            Ok(None) => return Tick::Idle,
            Err(e) => {
                tracing::error!(error = %e, "failed to poll job queue");
                return Tick::Idle;
            }
        };

        match queue.claim(job.id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %job.id, "job claimed by another worker");
                return Tick::LostRace(job.id);
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to claim job");
                return Tick::Idle;
            }
        }
        job.status = JobStatus::InProgress;
        job.started_at = Some(self.clock.now());

        let status = match self.runner.execute(&job).await {
            Ok(done) => done.status,
            Err(_) => JobStatus::Failed,
        };
        Tick::Processed(job.id, status)
    }

    async fn sweep_if_due(&mut self) {
        let Some(timeout) = self.stale_timeout else {
            return;
        };
        let now = self.clock.now();
        let every = chrono::Duration::from_std(timeout / 4).unwrap_or(chrono::Duration::zero());
        if self.last_sweep.is_some_and(|last| now - last < every) {
            return;
        }
        self.last_sweep = Some(now);

        match self.runner.queue().requeue_stale(timeout).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(requeued = n, "requeued stale jobs"),
            Err(e) => tracing::error!(error = %e, "stale job sweep failed"),
        }
    }
}
