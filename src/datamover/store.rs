//! Query interface over tracked data mover resources and their parents

use std::fmt;

use async_trait::async_trait;

use crate::crd::{
    MoverCondition, MoverPhase, MoverStatus, VolumeSnapshotBackup, VolumeSnapshotRestore,
    BACKUP_NAME_LABEL, RESTORE_NAME_LABEL,
};
use crate::error::Result;

/// Direction of a data mover transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MoverKind {
    /// VolumeSnapshotBackup, parent is a Backup
    Backup,
    /// VolumeSnapshotRestore, parent is a Restore
    Restore,
}

impl MoverKind {
    /// Kind name of the tracked resource
    pub fn resource_kind(&self) -> &'static str {
        match self {
            MoverKind::Backup => "VolumeSnapshotBackup",
            MoverKind::Restore => "VolumeSnapshotRestore",
        }
    }

    /// Kind name of the parent operation
    pub fn parent_kind(&self) -> &'static str {
        match self {
            MoverKind::Backup => "Backup",
            MoverKind::Restore => "Restore",
        }
    }

    /// Label linking a tracked resource to its parent
    pub fn parent_label(&self) -> &'static str {
        match self {
            MoverKind::Backup => BACKUP_NAME_LABEL,
            MoverKind::Restore => RESTORE_NAME_LABEL,
        }
    }
}

impl fmt::Display for MoverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_kind())
    }
}

/// Namespaced name of an object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Direction-independent view of a VolumeSnapshotBackup or VolumeSnapshotRestore
#[derive(Clone, Debug)]
pub struct TrackedResource {
    pub reference: ResourceRef,
    /// Value of the parent label, if set
    pub parent: Option<String>,
    pub phase: MoverPhase,
    pub conditions: Vec<MoverCondition>,
}

impl TrackedResource {
    /// The data mover gave up on this resource
    pub fn has_failed(&self) -> bool {
        self.phase.is_failed() && self.conditions.iter().any(MoverCondition::is_reconcile_error)
    }

    pub fn is_completed(&self) -> bool {
        self.phase == MoverPhase::Completed
    }

    fn from_parts(
        namespace: Option<String>,
        name: Option<String>,
        labels: Option<&std::collections::BTreeMap<String, String>>,
        label: &str,
        status: Option<MoverStatus>,
    ) -> Self {
        let status = status.unwrap_or_default();
        Self {
            reference: ResourceRef::new(namespace.unwrap_or_default(), name.unwrap_or_default()),
            parent: labels
                .and_then(|l| l.get(label))
                .filter(|v| !v.is_empty())
                .cloned(),
            phase: status.phase,
            conditions: status.conditions,
        }
    }
}

impl From<VolumeSnapshotBackup> for TrackedResource {
    fn from(vsb: VolumeSnapshotBackup) -> Self {
        TrackedResource::from_parts(
            vsb.metadata.namespace,
            vsb.metadata.name,
            vsb.metadata.labels.as_ref(),
            BACKUP_NAME_LABEL,
            vsb.status,
        )
    }
}

impl From<VolumeSnapshotRestore> for TrackedResource {
    fn from(vsr: VolumeSnapshotRestore) -> Self {
        TrackedResource::from_parts(
            vsr.metadata.namespace,
            vsr.metadata.name,
            vsr.metadata.labels.as_ref(),
            RESTORE_NAME_LABEL,
            vsr.status,
        )
    }
}

/// A backup or restore that owns tracked resources
#[derive(Clone, Debug)]
pub struct ParentOperation {
    pub uid: String,
    pub reference: ResourceRef,
    /// Phase is exactly Completed
    pub completed: bool,
}

/// Reads and deletes tracked data mover resources.
///
/// List results carry no ordering guarantee.
#[async_trait]
pub trait MoverStore: Send + Sync {
    /// Current state of one resource
    async fn get(&self, kind: MoverKind, reference: &ResourceRef) -> Result<TrackedResource>;

    /// Resources labeled with the given parent name, in any namespace
    async fn list_by_parent(&self, kind: MoverKind, parent: &str) -> Result<Vec<TrackedResource>>;

    /// Every resource of the kind
    async fn list_all(&self, kind: MoverKind) -> Result<Vec<TrackedResource>>;

    async fn delete(&self, kind: MoverKind, reference: &ResourceRef) -> Result<()>;
}

/// Looks up parent backups and restores
#[async_trait]
pub trait ParentStore: Send + Sync {
    /// Every parent of the kind
    async fn list_parents(&self, kind: MoverKind) -> Result<Vec<ParentOperation>>;

    /// Whether the named parent still exists
    async fn parent_exists(&self, kind: MoverKind, reference: &ResourceRef) -> Result<bool>;
}
