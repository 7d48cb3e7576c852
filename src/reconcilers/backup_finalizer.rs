//! Backup finalizer reconciler
//!
//! Moves a backup out of `FinalizingAfterPluginOperations[PartiallyFailed]`
//! once the plugin operations it was waiting on have concluded:
//! - Fetch the backup and decide whether there is anything to do
//! - Rebuild the final-updates payload
//! - Pick the terminal phase
//! - Upload metadata, then payload
//! - Patch the Backup object on every exit path

use std::sync::Arc;

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{Backup, BackupPhase};
use crate::error::{Result, ResultExt};
use crate::metrics;
use crate::storage::{BackupStoreGetter, OperationPhase, OperationSummary};

use super::backupper::Backupper;
use super::records::BackupRecords;

/// What a reconcile did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The backup no longer exists
    NotFound,
    /// The backup is not in a finalizing phase
    Skipped(BackupPhase),
    /// The backup was moved to the given terminal phase
    Finalized(BackupPhase),
    /// Storage holds the finalized backup but patching the Backup object
    /// failed; the object is still in its finalizing phase
    Uncommitted(BackupPhase),
}

/// Terminal phase for a backup leaving `current`.
///
/// Only a backup that was finalizing cleanly and whose operations all
/// completed ends up Completed.
pub fn target_phase(current: BackupPhase, summary: &OperationSummary) -> BackupPhase {
    if current == BackupPhase::FinalizingAfterPluginOperations && summary.all_completed() {
        BackupPhase::Completed
    } else {
        BackupPhase::PartiallyFailed
    }
}

/// Finalizes backups after their async plugin operations
pub struct BackupFinalizer {
    records: Arc<dyn BackupRecords>,
    stores: Arc<dyn BackupStoreGetter>,
    backupper: Arc<dyn Backupper>,
}

impl BackupFinalizer {
    pub fn new(
        records: Arc<dyn BackupRecords>,
        stores: Arc<dyn BackupStoreGetter>,
        backupper: Arc<dyn Backupper>,
    ) -> Self {
        Self {
            records,
            stores,
            backupper,
        }
    }

    /// Reconcile the backup `namespace/name`
    #[instrument(skip(self), fields(controller = "backup-finalizer"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<FinalizeOutcome> {
        debug!("Getting Backup");
        let Some(backup) = self
            .records
            .get_backup(namespace, name)
            .await
            .with_context(|| format!("getting backup {}/{}", namespace, name))?
        else {
            debug!("Unable to find Backup");
            return Ok(FinalizeOutcome::NotFound);
        };

        let phase = backup
            .phase()
            .with_context(|| format!("reading phase of backup {}/{}", namespace, name))?;
        if !phase.is_finalizing() {
            debug!(phase = %phase, "Backup is not awaiting finalizing, skipping");
            return Ok(FinalizeOutcome::Skipped(phase));
        }

        let original = backup.clone();
        let mut backup = backup;
        let result = self.finalize(&mut backup, phase).await;

        // Commit whatever was recorded, whether or not finalizing succeeded
        let committed = match self.records.patch_backup(&original, &backup).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Error updating backup");
                false
            }
        };

        let next = result?;
        if committed {
            Ok(FinalizeOutcome::Finalized(next))
        } else {
            Ok(FinalizeOutcome::Uncommitted(next))
        }
    }

    async fn finalize(&self, backup: &mut Backup, phase: BackupPhase) -> Result<BackupPhase> {
        let name = backup.name_any();
        let namespace = backup.namespace().unwrap_or_else(|| "default".to_string());

        let location_name = backup.spec.storage_location.clone();
        let location = self
            .records
            .get_storage_location(&namespace, &location_name)
            .await
            .with_context(|| format!("getting backup storage location {}", location_name))?;
        let store = self
            .stores
            .get(&location)
            .with_context(|| format!("getting backup store for location {}", location_name))?;

        let operations = store
            .get_backup_item_operations(&name)
            .await
            .with_context(|| format!("getting item operations of backup {}", name))?;
        let summary = OperationSummary::of(&operations);
        for op in operations.iter().filter(|op| op.phase() != OperationPhase::Completed) {
            warn!(
                operation = %op.spec.operation_id,
                item = %op.spec.resource_identifier,
                phase = ?op.phase(),
                error = op.status.error.as_deref().unwrap_or(""),
                "Item operation did not complete"
            );
        }

        {
            let status = backup.status.get_or_insert_with(Default::default);
            if status.async_backup_item_operations_attempted.is_none() {
                status.async_backup_item_operations_attempted = Some(summary.attempted as i32);
            }
            status.async_backup_item_operations_completed = Some(summary.completed as i32);
            status.async_backup_item_operations_failed = Some(summary.failed as i32);
        }

        info!("Setting up finalized backup temp file");
        let payload = tempfile::NamedTempFile::new()
            .with_context(|| "creating temp file for finalized backup")?;
        self.backupper
            .finalize_backup(backup, store.as_ref(), &operations, payload.path())
            .await
            .with_context(|| format!("finalizing backup {}", name))?;

        // The object only takes the terminal phase once both uploads succeed
        let next = phase.transition_to(target_phase(phase, &summary))?;
        let completed_at = Utc::now();
        let mut finalized = backup.clone();
        finalized.set_phase(next);
        if let Some(status) = finalized.status.as_mut() {
            status.completion_timestamp = Some(completed_at);
        }

        let metadata = serde_json::to_vec(&finalized).with_context(|| "encoding backup json")?;
        store
            .put_backup_metadata(&name, metadata)
            .await
            .with_context(|| format!("uploading metadata of backup {}", name))?;

        let payload_bytes = payload
            .as_file()
            .metadata()
            .with_context(|| "reading finalized backup size")?
            .len();
        let upload = tokio::fs::File::open(payload.path())
            .await
            .with_context(|| "opening finalized backup payload")?;
        store
            .put_backup_contents_final_updates(&name, Box::new(upload))
            .await
            .with_context(|| format!("uploading final content updates of backup {}", name))?;

        *backup = finalized;

        let schedule = backup.schedule_name();
        match next {
            BackupPhase::Completed => metrics::register_backup_success(&schedule),
            _ => metrics::register_backup_partial_failure(&schedule),
        }
        metrics::record_backup_completion(
            &schedule,
            payload_bytes,
            backup.status.as_ref().and_then(|s| s.start_timestamp),
            completed_at,
            next == BackupPhase::Completed,
        );

        info!(
            phase = %next,
            operations = summary.attempted,
            failed = summary.failed,
            "Backup finalized"
        );
        Ok(next)
    }
}
