//! Backup store access
//!
//! A backup store is the per-location object storage a backup's metadata,
//! contents and item operation list live in. The finalizer talks to it only
//! through the [`BackupStore`] trait.

mod filesystem;
mod item_operation;

pub use filesystem::*;
pub use item_operation::*;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::crd::BackupStorageLocation;
use crate::error::Result;

/// Streamed payload handed to the store
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

/// Object storage operations used while finalizing a backup
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Item operations recorded for the backup; empty when none were recorded
    async fn get_backup_item_operations(&self, name: &str) -> Result<Vec<BackupItemOperation>>;

    /// Original gzip tar contents of the backup
    async fn get_backup_contents(&self, name: &str) -> Result<Vec<u8>>;

    /// Previously uploaded final-updates layer, if any
    async fn get_backup_contents_final_updates(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the backup's JSON metadata
    async fn put_backup_metadata(&self, name: &str, metadata: Vec<u8>) -> Result<()>;

    /// Upload the final-updates layer
    async fn put_backup_contents_final_updates(&self, name: &str, contents: ContentStream)
        -> Result<()>;
}

/// Resolves a storage location to a store handle
pub trait BackupStoreGetter: Send + Sync {
    fn get(&self, location: &BackupStorageLocation) -> Result<Arc<dyn BackupStore>>;
}
