use std::sync::Arc;
use std::time::Duration;

use clipforge_config::ClipforgeConfig;
use clipforge_core::{CatalogClient, JobStore, OriginUploader, Recovery};
use clipforge_events::EventBus;
use clipforge_net::{AdminEgressPool, HttpCatalogClient};
use clipforge_origin::HttpOriginUploader;
use clipforge_store::{PgJobStore, PgRecoveryMirror};
use clipforge_telemetry::{LogFormat, LoggingConfig, Metrics};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::dispatch::FetcherRegistry;
use crate::error::{AppError, AppResult};
use crate::pipeline::WorkerContext;

const POOL_MAX_CONNECTIONS: u32 = 10;
const KILL_POLL_INTERVAL: Duration = Duration::from_secs(5);
const LEASE_POLL_BACKOFF: Duration = Duration::from_secs(2);

/// Dependencies required to bootstrap the worker pool.
pub(crate) struct BootstrapDependencies {
    config: ClipforgeConfig,
    ctx: Arc<WorkerContext>,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let config = clipforge_config::load_from_env().map_err(|err| AppError::config("load_from_env", err))?;

        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect(&config.queue_url)
            .await
            .map_err(|err| AppError::database("pool.connect", err))?;

        let store: Arc<dyn JobStore> = Arc::new(
            PgJobStore::new(pool.clone())
                .await
                .map_err(|err| AppError::pipeline("job_store.new", err))?,
        );
        let recovery: Arc<dyn Recovery> = Arc::new(PgRecoveryMirror::new(pool));

        let egress_pool = Arc::new(AdminEgressPool::new(
            config.admin.base_url.clone(),
            config.admin.internal_secret.clone(),
        ));
        let fetchers = Arc::new(FetcherRegistry::new(&config, egress_pool));

        let uploader: Arc<dyn OriginUploader> = Arc::new(HttpOriginUploader::new(
            config.storage_origin_base.clone(),
            config.storage_zone.clone(),
            config.storage_access_key.clone(),
            config.cdn_base.clone(),
            config.download_timeout,
        ));

        let catalog: Arc<dyn CatalogClient> = Arc::new(HttpCatalogClient::new(
            config.catalog_api_url.clone(),
            config.catalog_api_key.clone(),
        ));

        let metrics = Metrics::new().map_err(|err| AppError::telemetry("metrics.new", err))?;

        let ctx = Arc::new(WorkerContext {
            store,
            recovery,
            fetchers,
            uploader,
            catalog,
            temp_dir: config.temp_dir.clone(),
            upload_path_prefix: config.upload_path_prefix.clone(),
            worker_id: format!("worker-{}", std::process::id()),
            event_bus: Arc::new(EventBus::new()),
        });

        Ok(Self { config, ctx, metrics })
    }
}

/// Entry point for the worker pool boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or the worker pool itself fails to start.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    run_app_with(dependencies).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let logging = LoggingConfig {
        level: &dependencies.config.log_level,
        format: LogFormat::infer(),
        build_sha: clipforge_telemetry::build_sha(),
    };
    clipforge_telemetry::init_logging(&logging).map_err(|err| AppError::telemetry("logging.init", err))?;

    info!(
        environment = %dependencies.config.environment,
        worker_concurrency = dependencies.config.worker_concurrency,
        "clipforge worker pool starting"
    );

    let BootstrapDependencies { config, ctx, metrics } = dependencies;

    crate::recovery_sweep::run(ctx.store.as_ref(), ctx.recovery.as_ref()).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let watchdog_handle = tokio::spawn(clipforge_telemetry::watchdog::run(
        config.max_old_space_size_bytes,
        clipforge_telemetry::watchdog::DEFAULT_SAMPLE_INTERVAL,
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let mut worker_handles = Vec::with_capacity(config.worker_concurrency as usize);
    for index in 0..config.worker_concurrency {
        let ctx = Arc::clone(&ctx);
        let metrics = metrics.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let job_timeout = config.job_timeout;
        worker_handles.push(tokio::spawn(async move {
            worker_loop(index, ctx, metrics, job_timeout, &mut shutdown_rx).await;
        }));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping new leases");
    let _ = shutdown_tx.send(true);

    for handle in worker_handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "worker task join failed");
        }
    }
    if !watchdog_handle.is_finished() {
        watchdog_handle.abort();
    }
    if let Err(err) = watchdog_handle.await {
        warn!(error = %err, "memory watchdog task join failed");
    }

    info!("worker pool shutdown complete");
    Ok(())
}

async fn worker_loop(
    index: u32,
    ctx: Arc<WorkerContext>,
    metrics: Metrics,
    job_timeout: Duration,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) {
    let worker_id = format!("{}-{index}", ctx.worker_id);
    loop {
        if *shutdown.borrow() {
            return;
        }

        let leased = tokio::select! {
            leased = ctx.store.lease(&worker_id, job_timeout) => leased,
            _ = shutdown.changed() => continue,
        };

        let job = match leased {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    () = tokio::time::sleep(LEASE_POLL_BACKOFF) => continue,
                    _ = shutdown.changed() => continue,
                }
            }
            Err(err) => {
                warn!(worker_id = %worker_id, error = %err, "failed to lease next job");
                tokio::time::sleep(LEASE_POLL_BACKOFF).await;
                continue;
            }
        };

        metrics.inc_jobs_submitted();
        let cancellation = clipforge_core::CancellationToken::new();
        let watcher = tokio::spawn(crate::pipeline::watch_for_kill(
            Arc::clone(&ctx.store),
            job.id,
            cancellation.clone(),
            KILL_POLL_INTERVAL,
        ));

        crate::pipeline::process_job(&ctx, job, cancellation.clone()).await;
        cancellation.cancel();
        watcher.abort();

        if cancellation.is_cancelled() {
            metrics.inc_jobs_failed("cancelled");
        } else {
            metrics.inc_jobs_completed();
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler, falling back to ctrl_c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use clipforge_core::JobStatus;

    #[test]
    fn job_status_active_is_the_only_status_that_blocks_a_kill_watch() {
        assert!(matches!(JobStatus::Active, JobStatus::Active));
        assert!(!matches!(JobStatus::Completed, JobStatus::Active));
    }
}
