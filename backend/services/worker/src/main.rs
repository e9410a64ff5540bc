use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use shopsync_config::{init_tracing, AppConfig, MetaConfig, ShopifyConfig, WorkerConfig};
use shopsync_db::credentials::pg_repository::PgCredentialSource;
use shopsync_db::cursors::pg_repository::PgCursorStore;
use shopsync_db::jobs::pg_repository::PgJobQueue;
use shopsync_db::jobs::repositories::JobQueue;
use shopsync_db::staging::pg_repository::PgStagingSink;
use shopsync_engine::clock::{Clock, SystemClock};
use shopsync_engine::http::build_client;
use shopsync_engine::{CredentialStore, DriverRegistry, JobRunner, Worker};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing("info");
    tracing::info!(service = "shopsync-worker", "starting");

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
                tracing::error!(error = %e, "failed to load worker config");
                return ExitCode::FAILURE;
            }
        };

    let pool = match shopsync_db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = shopsync_db::apply_schema(&pool).await {
        tracing::error!(error = %e, "failed to apply schema");
        return ExitCode::FAILURE;
    }

    let queue = Arc::new(PgJobQueue::new(pool.clone()));
    if let Err(e) = queue.next_queued().await {
        tracing::error!(error = %e, "job queue is not readable");
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
        clock.clone(),
    );
    tracing::info!(platforms = ?registry.platforms(), "drivers registered");

    let credentials = Arc::new(CredentialStore::new(
        PgCredentialSource::new(pool.clone()),
        SystemClock,
        worker_config.credential_cache_ttl(),
    ));
    let runner = JobRunner::new(
        queue,
        Arc::new(PgCursorStore::new(pool)),
        credentials,
        registry,
    );

    let mut worker = Worker::new(Arc::new(runner), clock, worker_config.poll_interval());
    if let Some(timeout) = worker_config.stale_job_timeout() {
        worker = worker.with_stale_timeout(timeout);
    }

    tokio::select! {
        _ = worker.run() => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
    }
    ExitCode::SUCCESS
}
