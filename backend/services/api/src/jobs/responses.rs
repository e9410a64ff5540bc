use serde::Serialize;
use shopsync_db::jobs::models::SyncJob;

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub data: SyncJob,
}

/// Body for an enqueue that hit an existing QUEUED job of the same kind.
#[derive(Debug, Serialize)]
pub struct DuplicateJobResponse {
    pub data: Option<SyncJob>,
    pub duplicate: bool,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub data: Vec<SyncJob>,
    pub count: usize,
}
