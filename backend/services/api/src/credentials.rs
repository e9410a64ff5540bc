use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;

use crate::AppState;

/// Cache controls for whoever rotates tokens outside this service.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/credentials/invalidate", post(invalidate_all))
        .route("/shops/{shop_id}/credentials/invalidate", post(invalidate_shop))
}

async fn invalidate_all(State(state): State<AppState>) -> StatusCode {
    state.credentials.invalidate().await;
    StatusCode::NO_CONTENT
}

async fn invalidate_shop(State(state): State<AppState>, Path(shop_id): Path<String>) -> StatusCode {
    state.credentials.invalidate_shop(&shop_id).await;
    StatusCode::NO_CONTENT
}
