//! Data mover cleanup controller
//!
//! Watches finished backups and restores, waits for their data mover
//! resources to complete and removes the ones that are no longer needed.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use crate::controllers::backup_finalizer_controller::requeue_after;
use crate::controllers::Context;
use crate::crd::{Backup, Restore};
use crate::datamover::{MoverKind, ParentOperation, ResourceRef};
use crate::error::{Error, Result};
use crate::metrics;

/// Retry delay after a sweep that could not delete everything
const PARTIAL_CLEANUP_REQUEUE: Duration = Duration::from_secs(60);

/// A backup or restore whose data mover resources get cleaned up
pub trait MoverParent:
    Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
    /// Direction of the data mover resources this parent owns
    const KIND: MoverKind;

    /// Name used for logs and metrics
    const CONTROLLER: &'static str;

    /// Parent reached a phase it will not leave
    fn is_finished(&self) -> bool;

    /// Parent finished successfully
    fn is_completed(&self) -> bool;
}

impl MoverParent for Backup {
    const KIND: MoverKind = MoverKind::Backup;
    const CONTROLLER: &'static str = "backup-datamover-cleanup";

    fn is_finished(&self) -> bool {
        Backup::is_finished(self)
    }

    fn is_completed(&self) -> bool {
        Backup::is_completed(self)
    }
}

impl MoverParent for Restore {
    const KIND: MoverKind = MoverKind::Restore;
    const CONTROLLER: &'static str = "restore-datamover-cleanup";

    fn is_finished(&self) -> bool {
        Restore::is_finished(self)
    }

    fn is_completed(&self) -> bool {
        Restore::is_completed(self)
    }
}

/// Run the cleanup controller for parents of type `K`
pub async fn run<K: MoverParent>(context: Arc<Context>) {
    let api: Api<K> = context.watched_api();

    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("{} CRD not installed: {}", K::KIND.parent_kind(), e);
        return;
    }

    info!("Starting {} controller", K::CONTROLLER);

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, context)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!(error = %e, "Reconciliation error");
                metrics::RECONCILIATION_ERRORS
                    .with_label_values(&[K::CONTROLLER])
                    .inc();
            }
        })
        .await;
}

#[instrument(skip(obj, ctx), fields(kind = K::KIND.parent_kind(), name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile<K: MoverParent>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    if !obj.is_finished() {
        return Ok(Action::await_change());
    }

    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[K::CONTROLLER])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[K::CONTROLLER]).inc();

    let parent = ParentOperation {
        uid: obj.uid().unwrap_or_default(),
        reference: ResourceRef::new(
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        ),
        completed: obj.is_completed(),
    };

    match ctx.reaper.cleanup(K::KIND, &parent).await {
        Ok(report) if report.is_clean() => Ok(Action::await_change()),
        Ok(report) => {
            for warning in &report.warnings {
                warn!(resource = %warning.resource, error = %warning.error, "Data mover resource left behind");
            }
            Ok(Action::requeue(PARTIAL_CLEANUP_REQUEUE))
        }
        Err(e) if matches!(e.root(), Error::MoverFailed { .. }) => {
            // Failed transfers stay for inspection; nothing more to do until the parent changes
            warn!(error = %e, "Data mover resource failed, leaving it in place");
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

fn error_policy<K: MoverParent>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    debug!(kind = K::KIND.parent_kind(), name = %obj.name_any(), "Scheduling cleanup retry");
    error!(error = %error, "Data mover cleanup failed");
    Action::requeue(requeue_after(error))
}
