use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub shop_id: String,
    pub platform: String,
    pub job_type: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}
