//! Data mover integration
//!
//! Snapshot data is moved by an external controller that reports progress on
//! VolumeSnapshotBackup / VolumeSnapshotRestore objects. This module waits
//! for those objects to finish and removes them once their parent backup or
//! restore no longer needs them.

mod kube_client;
mod reaper;
mod store;
mod waiter;

pub use kube_client::KubeDataMoverClient;
pub use reaper::{ReapReport, ReapWarning, StaleResourceReaper};
pub use store::{MoverKind, MoverStore, ParentOperation, ParentStore, ResourceRef, TrackedResource};
pub use waiter::CompletionWaiter;
