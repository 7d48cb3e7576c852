//! Re-serialization of items touched by async operations

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::archive::{extract_into, write_tarball};
use crate::crd::Backup;
use crate::error::{Result, ResultExt};
use crate::storage::{BackupItemOperation, BackupStore};

/// Produces the final-updates payload of a backup
#[async_trait]
pub trait Backupper: Send + Sync {
    /// Write a gzip tar stream to `out` holding the current form of every
    /// item whose async operation has concluded
    async fn finalize_backup(
        &self,
        backup: &Backup,
        store: &dyn BackupStore,
        operations: &[BackupItemOperation],
        out: &Path,
    ) -> Result<()>;
}

/// Builds final updates from the contents already in the backup store.
///
/// The stored contents are materialized with any previous final-updates
/// layer on top, so an item rewritten by an earlier finalization keeps its
/// newest form. Every concluded item found in the result is written to the
/// new layer.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBackupper;

impl ArchiveBackupper {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backupper for ArchiveBackupper {
    async fn finalize_backup(
        &self,
        backup: &Backup,
        store: &dyn BackupStore,
        operations: &[BackupItemOperation],
        out: &Path,
    ) -> Result<()> {
        let name = backup.name_any();
        let contents = store
            .get_backup_contents(&name)
            .await
            .with_context(|| format!("downloading contents of backup {}", name))?;
        let previous = store
            .get_backup_contents_final_updates(&name)
            .await
            .with_context(|| format!("downloading final updates of backup {}", name))?;

        let items: Vec<PathBuf> = operations
            .iter()
            .filter(|op| op.is_concluded())
            .map(|op| op.spec.resource_identifier.item_path())
            .collect();
        let out = out.to_path_buf();

        let written = tokio::task::spawn_blocking(move || -> Result<usize> {
            let workdir = tempfile::Builder::new()
                .prefix("backup-finalize-")
                .tempdir()
                .with_context(|| "creating working directory")?;

            let mut layers = vec![contents];
            layers.extend(previous);
            extract_into(layers.iter().map(Vec::as_slice), workdir.path())?;

            let mut present = Vec::with_capacity(items.len());
            for item in items {
                if workdir.path().join(&item).is_file() {
                    present.push(item);
                } else {
                    warn!(item = %item.display(), "Item updated by async operation is missing from backup contents");
                }
            }

            let file = File::create(&out)
                .with_context(|| format!("creating {}", out.display()))?;
            write_tarball(file, workdir.path(), &present)?;
            Ok(present.len())
        })
        .await??;

        info!(backup = %name, items = written, "Wrote final backup content updates");
        Ok(())
    }
}
