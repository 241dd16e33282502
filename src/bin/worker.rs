use analysis_worker::{
    app_state::AppState,
    config::WorkerConfig,
    db,
    models::pipeline::PipelineConfig,
    services::{pipeline::Pipeline, queue::RedisWorkQueue, storage::S3Client},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting analysis worker");

    // Load configuration
    let config = WorkerConfig::from_env().expect("Failed to load configuration");

    let pipeline_config =
        PipelineConfig::from_file(&config.pipeline_file).expect("Failed to load pipeline file");
    tracing::info!(
        path = %config.pipeline_file.display(),
        groups = pipeline_config.groups.len(),
        stages = pipeline_config.stage_count(),
        outputs = pipeline_config.outputs.len(),
        "Pipeline loaded"
    );
    let pipeline = Pipeline::from_config(&pipeline_config, config.stage_timeout());
    tracing::debug!(stages = ?pipeline.stage_names(), "Stage order");

    // Prometheus scrape endpoint
    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing storage client");
    let storage = S3Client::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize storage client");

    tracing::info!("Connecting to Redis work queue");
    let queue = RedisWorkQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    queue.health_check().await.expect("Redis is unreachable");

    match queue.recover_in_flight().await {
        Ok(0) => {}
        Ok(n) => tracing::warn!(recovered = n, "Requeued messages left in flight by a previous run"),
        Err(e) => tracing::error!(error = %e, "Failed to recover in-flight messages"),
    }
    match queue.queue_depth().await {
        Ok(depth) => tracing::info!(pending = depth, "Work queue connected"),
        Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
    }

    let state = AppState::new(db_pool, storage, queue);
    let consumer = state.consumer(&config, pipeline);

    tracing::info!("Worker ready, starting job processing loop");
    consumer.run(shutdown_signal()).await;
    tracing::info!("Worker stopped");
}

fn describe_metrics() {
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Jobs that reached the done state"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Job attempts that ended in the error state"
    );
    metrics::describe_counter!(
        "analysis_messages_dead_lettered_total",
        "Messages moved to the dead-letter list"
    );
    metrics::describe_counter!(
        "analysis_stage_failures_total",
        "Stage runs that exited nonzero, timed out or failed to launch"
    );
    metrics::describe_histogram!(
        "analysis_job_duration_seconds",
        "Time to process a job from receipt to done"
    );
    metrics::describe_histogram!(
        "analysis_stage_duration_seconds",
        "Wall-clock time of a single stage run"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown requested, finishing current job");
}
