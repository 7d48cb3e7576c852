//! Reconcilers for backup finalization
//!
//! This module contains the business logic behind the controllers:
//! - Fetching backups and their storage locations
//! - Rebuilding the final backup payload
//! - Choosing the terminal phase and persisting the result

pub mod backup_finalizer;
pub mod backupper;
pub mod records;

pub use backup_finalizer::{target_phase, BackupFinalizer, FinalizeOutcome};
pub use backupper::{ArchiveBackupper, Backupper};
pub use records::{merge_patch, BackupRecords, KubeBackupRecords};
