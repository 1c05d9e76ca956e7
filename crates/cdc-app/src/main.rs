//! `cdc-router`: the composition root. Wires the replication decoder, the
//! NOTIFY telemetry listener, the router, and the configured sinks into one
//! supervised task graph for `run`, or drives a single resumable job for
//! `import`/`delete` — the same split the teacher's binary makes between
//! "start the server" and the demo/maintenance paths run ad hoc.

mod config;
mod logging;
mod sinks;
mod twin_store;

use clap::{Parser, Subcommand};
use config::AppConfig;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "cdc-router", version, about = "Change-data-capture event router for a digital-twin graph store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the replication decoder, telemetry listener, and router until terminated.
    Run,
    /// Imports a graph snapshot (models, twins, relationships) from an ND-JSON file.
    Import {
        graph_name: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Deletes every twin, relationship, and model in a graph.
    Delete {
        graph_name: String,
        #[arg(long)]
        job_id: Option<String>,
    },
}

fn build_pool(database_url: &str) -> Result<PgPool, cdc_core::CdcError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .build(manager)
        .map_err(|e| cdc_core::CdcError::database_error(format!("failed to build connection pool: {e}")))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let app_config = AppConfig::from_env()?;
    app_config.validate()?;
    logging::init(&app_config.cdc.monitoring.log_level);

    #[cfg(feature = "monitoring")]
    if app_config.cdc.monitoring.metrics_enabled {
        cdc_core::metrics::register_all();
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Run => run(app_config).await,
        Command::Import { graph_name, file, job_id } => {
            let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_import(app_config, &graph_name, &job_id, &file).await
        }
        Command::Delete { graph_name, job_id } => {
            let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_delete(app_config, &graph_name, &job_id).await
        }
    }
}

/// Drives the decode -> route -> sink pipeline (§4: C5/C6 feed C1, C7 drains
/// it) until SIGINT/SIGTERM, then lets the router drain in-flight events.
async fn run(app_config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = build_pool(&app_config.cdc.replication.database_url)?;

    let dlq = Arc::new(cdc_events::DlqStore::new(pool.clone(), app_config.dlq_schema.clone()));
    dlq.ensure_table()?;

    let sinks = sinks::build_sinks(app_config.sinks, dlq.clone() as Arc<dyn cdc_core::DlqWriter>)?;
    tracing::info!(sink_count = sinks.len(), "sinks constructed");

    let queue = cdc_events::EventQueue::new(EVENT_QUEUE_CAPACITY);
    let producer = queue.sender();

    let decoder = Arc::new(cdc_replication::ReplicationDecoder::new(
        app_config.cdc.replication.clone(),
        producer.clone(),
    ));
    let telemetry = Arc::new(cdc_replication::TelemetryListener::new(
        app_config.cdc.replication.clone(),
        producer,
    ));
    let router = Arc::new(cdc_events::Router::new(
        queue,
        app_config.routes,
        sinks,
        app_config
            .cdc
            .replication
            .source_uri
            .clone()
            .unwrap_or_else(|| "postgresql://cdc-router".to_string()),
    ));

    let cancellation = CancellationToken::new();
    let mut signals = shutdown_signal();

    let decoder_task = tokio::spawn({
        let decoder = decoder.clone();
        let cancellation = cancellation.clone();
        async move { decoder.run(cancellation).await }
    });
    let telemetry_task = tokio::spawn({
        let telemetry = telemetry.clone();
        let cancellation = cancellation.clone();
        async move { telemetry.run(cancellation).await }
    });
    let router_task = tokio::spawn({
        let router = router.clone();
        let cancellation = cancellation.clone();
        async move { router.run(cancellation).await }
    });

    signals.recv().await;
    tracing::info!("shutdown signal received, draining in-flight events");
    cancellation.cancel();

    let _ = tokio::join!(decoder_task, telemetry_task, router_task);
    tracing::info!("shutdown complete");
    Ok(())
}

/// One-shot CLI entry point for the import job engine (§4.9): acquires the
/// lease itself rather than going through an HTTP job-submission surface,
/// since that surface is the external collaborator's job to expose.
async fn run_import(
    app_config: AppConfig,
    graph_name: &str,
    job_id: &str,
    file: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = build_pool(&app_config.cdc.replication.database_url)?;
    let job_store = acquire_job(&pool, graph_name, job_id, cdc_core::JobType::Import, &app_config)?;

    let twin_store: Arc<dyn cdc_core::TwinStore> = Arc::new(twin_store::UnconfiguredTwinStore);
    let engine = cdc_jobs::ImportEngine::new(job_store, twin_store, app_config.cdc.jobs.clone());
    let cancellation = cancel_on_shutdown_signal();
    let status = engine.run(graph_name, job_id, file, cancellation).await?;
    tracing::info!(job_id, ?status, "import finished");
    Ok(())
}

async fn run_delete(
    app_config: AppConfig,
    graph_name: &str,
    job_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = build_pool(&app_config.cdc.replication.database_url)?;
    let job_store = acquire_job(&pool, graph_name, job_id, cdc_core::JobType::Delete, &app_config)?;

    let twin_store: Arc<dyn cdc_core::TwinStore> = Arc::new(twin_store::UnconfiguredTwinStore);
    let engine = cdc_jobs::DeleteEngine::new(job_store, twin_store, app_config.cdc.jobs.clone());
    let cancellation = cancel_on_shutdown_signal();
    let status = engine.run(graph_name, job_id, cancellation).await?;
    tracing::info!(job_id, ?status, "delete finished");
    Ok(())
}

/// Creates the job record if it doesn't exist yet and acquires its lease,
/// the same `tryAcquire`-guards-`create` sequencing the job service uses for
/// externally submitted jobs (§4.8).
fn acquire_job(
    pool: &PgPool,
    graph_name: &str,
    job_id: &str,
    job_type: cdc_core::JobType,
    app_config: &AppConfig,
) -> Result<Arc<dyn cdc_jobs::JobLeaseStore>, cdc_core::CdcError> {
    let instance_id = cdc_jobs::instance_id();
    let job_store = cdc_jobs::JobStore::new(pool.clone(), instance_id);
    job_store.ensure_schema(graph_name)?;

    if job_store.get(graph_name, job_id)?.is_none() {
        let record = cdc_core::JobRecord::new(job_id, job_type, serde_json::json!({}));
        job_store.create(graph_name, &record)?;
    }

    let lease = chrono::Duration::from_std(app_config.cdc.jobs.lease_duration)
        .unwrap_or_else(|_| chrono::Duration::seconds(300));
    match job_store.try_acquire(graph_name, job_id, lease)? {
        cdc_jobs::AcquireOutcome::Acquired => Ok(Arc::new(job_store)),
        cdc_jobs::AcquireOutcome::Denied => {
            Err(cdc_core::CdcError::LeaseLost { job_id: job_id.to_string() })
        }
        cdc_jobs::AcquireOutcome::JobNotFound => {
            Err(cdc_core::CdcError::internal(format!("job {job_id} not found after create")))
        }
    }
}

/// A `CancellationToken` cancelled the first time SIGINT/SIGTERM fires,
/// so a foreground `import`/`delete` run can be interrupted cleanly (the
/// engine checkpoints and exits with a `cancelled` status instead of being
/// killed mid-batch).
fn cancel_on_shutdown_signal() -> CancellationToken {
    let cancellation = CancellationToken::new();
    let mut signals = shutdown_signal();
    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            signals.recv().await;
            cancellation.cancel();
        }
    });
    cancellation
}

/// Resolves on the first SIGINT or (unix-only) SIGTERM, mirroring the
/// graceful-shutdown expectation of a long-running router process.
fn shutdown_signal() -> tokio::sync::mpsc::Receiver<()> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = tx.send(()).await;
    });
    rx
}
