mod credentials;
mod error;
mod jobs;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use shopsync_common::types::ServiceInfo;
use shopsync_config::{init_tracing, AppConfig, MetaConfig, ShopifyConfig, WorkerConfig};
use shopsync_db::credentials::pg_repository::PgCredentialSource;
use shopsync_db::cursors::pg_repository::PgCursorStore;
use shopsync_db::jobs::pg_repository::PgJobQueue;
use shopsync_db::jobs::repositories::JobQueue;
use shopsync_db::staging::pg_repository::PgStagingSink;
use shopsync_engine::clock::{Clock, SystemClock};
use shopsync_engine::http::build_client;
use shopsync_engine::{CredentialResolver, CredentialStore, DriverRegistry, JobRunner};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub runner: Arc<JobRunner>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info() -> Json<ServiceInfo> {
    Json(ServiceInfo::new("shopsync-api"))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .merge(jobs::router())
        .merge(credentials::router())
        .with_state(state)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("info");
    tracing::info!(service = "shopsync-api", "starting");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let (worker_config, shopify, meta) =
        match (WorkerConfig::from_env(), ShopifyConfig::from_env(), MetaConfig::from_env()) {
            (Ok(w), Ok(s), Ok(m)) => (w, s, m),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                tracing::error!(error = %e, "failed to load sync config");
                return ExitCode::FAILURE;
            }
        };

    let pool = match shopsync_db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to create database pool");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = shopsync_db::apply_schema(&pool).await {
        tracing::error!(error = %e, "failed to apply schema");
        return ExitCode::FAILURE;
    }

    let http = match build_client(Duration::from_secs(worker_config.http_timeout_secs)) {
        Ok(http) => http,
        Err(e) => {
            tracing::error!(error = %e, "failed to build http client");
            return ExitCode::FAILURE;
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = DriverRegistry::builtin(
        http,
        shopify,
        meta,
        worker_config.http_max_retries,
        Arc::new(PgStagingSink::new(pool.clone())),
        clock,
    );

    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool.clone()));
    let credentials = Arc::new(CredentialStore::new(
        PgCredentialSource::new(pool.clone()),
        SystemClock,
        worker_config.credential_cache_ttl(),
    ));
    let runner = JobRunner::new(
        queue.clone(),
        Arc::new(PgCursorStore::new(pool)),
        credentials.clone(),
        registry,
    );

    let app = build_router(AppState {
        queue,
        credentials,
        runner: Arc::new(runner),
    });
    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr(), "invalid bind address");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, "listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
