//! Backup store on a mounted filesystem
//!
//! Uses the same object layout as the object-storage backends:
//! `<root>/<bucket>/<prefix>/backups/<name>/...`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tokio::fs;
use tracing::debug;

use crate::crd::BackupStorageLocation;
use crate::error::{Error, Result, ResultExt};

use super::{BackupItemOperation, BackupStore, BackupStoreGetter, ContentStream};

/// Provider name served by [`FilesystemBackupStoreGetter`]
pub const FILESYSTEM_PROVIDER: &str = "filesystem";

const METADATA_FILE: &str = "velero-backup.json";

/// Backup store rooted at a directory
#[derive(Debug, Clone)]
pub struct FilesystemBackupStore {
    base: PathBuf,
}

impl FilesystemBackupStore {
    /// Store whose backups live under `base/backups`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Directory holding all objects of one backup
    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.base.join("backups").join(name)
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.backup_dir(name).join(METADATA_FILE)
    }

    fn contents_path(&self, name: &str) -> PathBuf {
        self.backup_dir(name).join(format!("{}.tar.gz", name))
    }

    fn item_operations_path(&self, name: &str) -> PathBuf {
        self.backup_dir(name).join(format!("{}-itemoperations.json.gz", name))
    }

    fn final_updates_path(&self, name: &str) -> PathBuf {
        self.backup_dir(name)
            .join(format!("{}-contents-final-updates.tar.gz", name))
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::storage(format!("reading {}: {}", path.display(), e))),
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::storage(format!("creating {}: {}", parent.display(), e)))?;
    }
    Ok(())
}

#[async_trait]
impl BackupStore for FilesystemBackupStore {
    async fn get_backup_item_operations(&self, name: &str) -> Result<Vec<BackupItemOperation>> {
        let path = self.item_operations_path(name);
        let Some(compressed) = read_optional(&path).await? else {
            debug!(backup = %name, "No item operations recorded");
            return Ok(Vec::new());
        };

        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| Error::decode(format!("decompressing {}: {}", path.display(), e)))?;
        let operations = serde_json::from_slice(&json)
            .with_context(|| format!("parsing item operations of backup {}", name))?;
        Ok(operations)
    }

    async fn get_backup_contents(&self, name: &str) -> Result<Vec<u8>> {
        read_optional(&self.contents_path(name))
            .await?
            .ok_or_else(|| Error::not_found("BackupContents", name))
    }

    async fn get_backup_contents_final_updates(&self, name: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.final_updates_path(name)).await
    }

    async fn put_backup_metadata(&self, name: &str, metadata: Vec<u8>) -> Result<()> {
        let path = self.metadata_path(name);
        ensure_parent(&path).await?;
        fs::write(&path, metadata)
            .await
            .map_err(|e| Error::storage(format!("writing {}: {}", path.display(), e)))
    }

    async fn put_backup_contents_final_updates(
        &self,
        name: &str,
        mut contents: ContentStream,
    ) -> Result<()> {
        let path = self.final_updates_path(name);
        ensure_parent(&path).await?;
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| Error::storage(format!("creating {}: {}", path.display(), e)))?;
        tokio::io::copy(&mut contents, &mut file)
            .await
            .map_err(|e| Error::storage(format!("writing {}: {}", path.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage(format!("syncing {}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// Serves `filesystem` storage locations from a mounted volume
#[derive(Debug, Clone)]
pub struct FilesystemBackupStoreGetter {
    root: PathBuf,
}

impl FilesystemBackupStoreGetter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BackupStoreGetter for FilesystemBackupStoreGetter {
    fn get(&self, location: &BackupStorageLocation) -> Result<Arc<dyn BackupStore>> {
        let spec = &location.spec;
        if spec.provider != FILESYSTEM_PROVIDER {
            return Err(Error::config(format!(
                "Unsupported backup storage provider '{}': only '{}' is supported",
                spec.provider, FILESYSTEM_PROVIDER
            )));
        }
        if spec.object_storage.bucket.is_empty() {
            return Err(Error::config("Backup storage location has an empty bucket"));
        }

        let mut base = self.root.join(&spec.object_storage.bucket);
        if let Some(prefix) = spec.object_storage.prefix.as_deref() {
            let prefix = prefix.trim_matches('/');
            if !prefix.is_empty() {
                base.push(prefix);
            }
        }
        Ok(Arc::new(FilesystemBackupStore::new(base)))
    }
}
