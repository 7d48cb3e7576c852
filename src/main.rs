//! Backup Finalizer Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client, wires
//! the finalizer and data mover cleanup, and runs the controllers.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backup_finalizer_operator::{
    config::OperatorConfig,
    controllers::{self, Context},
    crd::{Backup, Restore},
    datamover::{CompletionWaiter, KubeDataMoverClient, StaleResourceReaper},
    metrics,
    reconcilers::{ArchiveBackupper, BackupFinalizer, KubeBackupRecords},
    storage::FilesystemBackupStoreGetter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Backup Finalizer Operator");

    let config = OperatorConfig::from_env()?;
    info!(
        poll_interval_secs = config.poll_interval.as_secs(),
        timeout_secs = config.mover_timeout.as_secs(),
        store_root = %config.backup_store_root.display(),
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        "Loaded configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let finalizer = Arc::new(BackupFinalizer::new(
        Arc::new(KubeBackupRecords::new(client.clone())),
        Arc::new(FilesystemBackupStoreGetter::new(config.backup_store_root.clone())),
        Arc::new(ArchiveBackupper::new()),
    ));

    let mover_client = Arc::new(KubeDataMoverClient::new(client.clone()));
    let waiter = CompletionWaiter::new(mover_client.clone())
        .with_poll_interval(config.poll_interval)
        .with_timeout(config.mover_timeout);
    let reaper = Arc::new(StaleResourceReaper::new(
        mover_client.clone(),
        mover_client,
        waiter,
    ));

    let metrics_port = config.metrics_port;
    let context = Arc::new(Context::new(client, config, finalizer, reaper));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    // Run all controllers concurrently
    let finalizer_controller = controllers::run_backup_finalizer_controller(context.clone());
    let backup_cleanup_controller = controllers::run_data_mover_controller::<Backup>(context.clone());
    let restore_cleanup_controller =
        controllers::run_data_mover_controller::<Restore>(context.clone());

    // Handle graceful shutdown
    tokio::select! {
        _ = finalizer_controller => {
            error!("Backup finalizer controller exited unexpectedly");
        }
        _ = backup_cleanup_controller => {
            error!("Backup data mover cleanup controller exited unexpectedly");
        }
        _ = restore_cleanup_controller => {
            error!("Restore data mover cleanup controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    info!("Backup Finalizer Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
