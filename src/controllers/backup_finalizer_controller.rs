//! Backup finalizer controller
//!
//! Watches Backup resources and finalizes the ones waiting in a
//! finalizing phase.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::Backup;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::FinalizeOutcome;

const CONTROLLER: &str = "backup-finalizer";

/// Retry delay when the Backup object could not be patched
const UNCOMMITTED_REQUEUE: Duration = Duration::from_secs(30);

/// Run the backup finalizer controller
pub async fn run(context: Arc<Context>) {
    let api: Api<Backup> = context.watched_api();

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Backup CRD not installed: {}", e);
        return;
    }

    info!("Starting backup finalizer controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled Backup"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&[CONTROLLER])
                        .inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Backup>, ctx: Arc<Context>) -> Result<Action> {
    // Cached copy says there is nothing to finalize; skip the round-trip
    if let Ok(phase) = obj.phase() {
        if !phase.is_finalizing() {
            return Ok(Action::await_change());
        }
    }

    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[CONTROLLER])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[CONTROLLER]).inc();

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let outcome = ctx.finalizer.reconcile(&namespace, &obj.name_any()).await?;
    match &outcome {
        FinalizeOutcome::Finalized(phase) => {
            info!(phase = %phase, "Backup finalized");
        }
        FinalizeOutcome::Uncommitted(phase) => {
            warn!(phase = %phase, "Backup finalized in storage but not on the cluster, retrying");
        }
        FinalizeOutcome::Skipped(phase) => {
            debug!(phase = %phase, "Backup not finalizing");
        }
        FinalizeOutcome::NotFound => {
            debug!("Backup deleted before finalizing");
        }
    }

    Ok(next_action(&outcome))
}

/// What to do after a successful reconcile
pub(crate) fn next_action(outcome: &FinalizeOutcome) -> Action {
    match outcome {
        // The object did not change, so no watch event will bring it back
        FinalizeOutcome::Uncommitted(_) => Action::requeue(UNCOMMITTED_REQUEUE),
        _ => Action::await_change(),
    }
}

/// Error policy for the controller
fn error_policy(obj: Arc<Backup>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        name = %obj.name_any(),
        error = %error,
        "Finalizing backup failed, scheduling retry"
    );
    Action::requeue(requeue_after(error))
}

/// Requeue delay by error class
pub(crate) fn requeue_after(error: &Error) -> Duration {
    match error.root() {
        Error::Kube(_) => Duration::from_secs(30),
        Error::Config(_) | Error::UnknownPhase { .. } | Error::InvalidTransition { .. } => {
            Duration::from_secs(300)
        }
        Error::Storage(_) | Error::Io(_) | Error::Decode(_) => Duration::from_secs(60),
        Error::MoverTimeout { .. } => Duration::from_secs(60),
        _ => Duration::from_secs(30),
    }
}
