use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commitreel_core::executables::ToolPaths;
use commitreel_pipeline::blob::LocalBlobStore;
use commitreel_pipeline::config::PipelineConfig;
use commitreel_pipeline::dispatch::ChannelDispatcher;
use commitreel_pipeline::store::PgBuildStore;
use commitreel_pipeline::Pipeline;
use commitreel_worker::config::WorkerConfig;
use commitreel_worker::poller::BuildWorker;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "commitreel_worker=info,commitreel_pipeline=info,commitreel_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let worker_config = WorkerConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();
    tracing::info!(
        media_root = %pipeline_config.media_root.display(),
        domains = ?pipeline_config.project_domains,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = commitreel_db::create_pool(&worker_config.database_url)
        .await
        .expect("Failed to connect to database");
    commitreel_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    commitreel_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    // --- Tools ---
    let tools = Arc::new(ToolPaths::from_env());
    for tool in commitreel_core::executables::Tool::ALL {
        match tools.resolve(tool) {
            Ok(path) => tracing::info!(tool = tool.command_name(), path = %path.display(), "Tool resolved"),
            Err(e) => tracing::warn!(error = %e, "Tool not available"),
        }
    }

    // --- Pipeline ---
    let (dispatcher, tasks) = ChannelDispatcher::new();
    let pipeline = Pipeline::new(
        Arc::new(PgBuildStore::new(pool.clone())),
        Arc::new(LocalBlobStore::new(pipeline_config.media_root.clone())),
        Arc::new(dispatcher),
        tools,
        pipeline_config,
    );
    let worker = BuildWorker::new(
        pipeline,
        worker_config.poll_interval,
        worker_config.batch_size,
    );

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let worker_handle = tokio::spawn(async move {
        worker.run(tasks, cancel_clone).await;
    });

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Build worker task panicked");
    }

    pool.close().await;
    tracing::info!("Worker stopped");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), finishing current build");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing current build");
        }
    }
}
