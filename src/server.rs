use crate::config::Config;
use crate::error::NskvResult;
use crate::handlers::{
    add_job, cache_stats, cancel_job, check_rate_limit, complete_job, fail_job, get_job,
    get_rate_limit_usage, health_check, next_job, queue_stats, reset_rate_limit, retry_job,
    AppState, SharedState,
};
use crate::keyspace::Keyspace;
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::queue::JobQueue;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Builds the admin API router over `state`.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        // Rate limiting endpoints
        .route("/ratelimit/:identifier", delete(reset_rate_limit))
        .route("/ratelimit/:identifier/check", post(check_rate_limit))
        .route("/ratelimit/:identifier/usage", get(get_rate_limit_usage))
        // Job queue endpoints
        .route("/jobs", post(add_job))
        .route("/jobs/next", post(next_job))
        .route("/jobs/stats", get(queue_stats))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/jobs/:id/complete", post(complete_job))
        .route("/jobs/:id/fail", post(fail_job))
        .route("/jobs/:id/retry", post(retry_job))
        // Cache and health endpoints
        .route("/cache/stats", get(cache_stats))
        .route("/health", get(health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    config: Config,
    state: SharedState,
}

impl Server {
    /// Connects to the configured store and prepares the application.
    pub async fn new(config: Config) -> NskvResult<Self> {
        config.validate()?;
        let keyspace = Keyspace::connect(&config).await?;
        Ok(Self::with_keyspace(config, keyspace))
    }

    pub fn with_keyspace(config: Config, keyspace: Keyspace) -> Self {
        let state = AppState::new(keyspace, config.clone());
        Self { config, state }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        info!("nskv server listening on {}", self.config.bind_addr);
        info!(backend = %self.config.backend, "Health check available at /health");

        let maintenance = spawn_maintenance(
            self.state.keyspace.queue.clone(),
            self.config.cleanup_interval(),
            self.config.job_retention(),
            self.config.stale_job_timeout(),
        );

        let app = create_app(self.state);

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        maintenance.abort();
        served?;
        Ok(())
    }
}

/// Periodically prunes finished jobs and, when a stale timeout is set,
/// returns abandoned processing jobs to the queue.
pub fn spawn_maintenance(
    queue: JobQueue,
    every: Duration,
    retention: Duration,
    stale_after: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            if let Err(err) = queue.cleanup(retention).await {
                error!(error = %err, "job cleanup failed");
            }

            if let Some(stale_after) = stale_after {
                match queue.requeue_stale(stale_after).await {
                    Ok(0) => {}
                    Ok(requeued) => info!(requeued, "stale jobs requeued"),
                    Err(err) => error!(error = %err, "stale job requeue failed"),
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
