//! Application bootstrap wiring.
//!
//! Boot order matters: configuration, logging, metrics, then the startup
//! sweep of stale workspaces, and only then the listener. The reclaim worker
//! is joined after the server loop exits so queued cleanup still runs.

use stemsplit_config::ServiceConfig;
use stemsplit_events::EventBus;
use stemsplit_jobs::{
    JobService, ReclaimQueue, ReclaimWorker, SeparationInvoker, WorkspaceAllocator,
    spawn_reclaim_worker, sweep,
};
use stemsplit_telemetry::{LoggingConfig, Metrics};
use tracing::info;

use crate::error::{AppError, AppResult};

/// Dependencies required to bootstrap the application.
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    config: ServiceConfig,
    events: EventBus,
    telemetry: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        let config = ServiceConfig::from_env()
            .map_err(|err| AppError::config("service_config.from_env", err))?;
        let telemetry =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            logging: LoggingConfig::default(),
            config,
            events: EventBus::new(),
            telemetry,
        })
    }
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or application startup fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    run_app_with(dependencies).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies {
        logging,
        config,
        events,
        telemetry,
    } = dependencies;

    stemsplit_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    info!(
        workspace_root = %config.workspace_root.display(),
        tool = %config.tool_binary,
        "stemsplit bootstrap starting"
    );

    let (jobs, worker, reclaim_queue) = build_pipeline(&config, &events, &telemetry)?;

    let api = stemsplit_api::ApiServer::new(
        jobs,
        events.clone(),
        telemetry.clone(),
        config.max_upload_bytes,
    );
    info!(addr = %config.bind_addr, "launching api listener");
    let serve_result = api.serve(config.bind_addr).await;

    // Dropping the last queue handle lets the worker drain and stop.
    drop(reclaim_queue);
    worker.join().await;

    serve_result.map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("api server shutdown complete");
    Ok(())
}

/// Wire the job pipeline: workspace allocator, startup sweep, reclaim worker,
/// tool invoker.
fn build_pipeline(
    config: &ServiceConfig,
    events: &EventBus,
    telemetry: &Metrics,
) -> AppResult<(JobService, ReclaimWorker, ReclaimQueue)> {
    let allocator = WorkspaceAllocator::new(&config.workspace_root)
        .map_err(|err| AppError::jobs("workspace.root", err))?;

    let swept = sweep(allocator.root(), config.sweep_max_age, events, telemetry)
        .map_err(|err| AppError::jobs("sweep.startup", err))?;
    info!(removed = swept, "startup workspace sweep complete");

    let (queue, worker) = spawn_reclaim_worker(allocator.clone(), events.clone(), telemetry.clone());
    let invoker = SeparationInvoker::new(config.tool_binary.clone(), config.tool_deadline);
    let jobs = JobService::new(
        allocator,
        invoker,
        queue.clone(),
        events.clone(),
        telemetry.clone(),
    );
    Ok((jobs, worker, queue))
}
