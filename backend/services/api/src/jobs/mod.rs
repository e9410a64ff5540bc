pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(handlers::create_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/run", post(handlers::run_job))
        .route("/shops/{shop_id}/jobs", get(handlers::list_shop_jobs))
}
