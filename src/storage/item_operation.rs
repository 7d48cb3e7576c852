//! Async item operations reported by backup item action plugins

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One plugin operation tracked after the main backup pass
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupItemOperation {
    pub spec: OperationSpec,
    #[serde(default)]
    pub status: OperationStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    /// Backup the operation belongs to
    pub backup_name: String,

    #[serde(rename = "backupUID", default)]
    pub backup_uid: String,

    /// Plugin that started the operation
    #[serde(default)]
    pub backup_item_action: String,

    /// Item the operation concerns
    pub resource_identifier: ResourceIdentifier,

    #[serde(rename = "operationID")]
    pub operation_id: String,
}

/// Identifies an item inside a backup
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    /// Resource with optional group, e.g. `persistentvolumeclaims` or
    /// `volumesnapshots.snapshot.storage.k8s.io`
    pub group_resource: String,

    /// Empty for cluster-scoped items
    #[serde(default)]
    pub namespace: String,

    pub name: String,
}

impl ResourceIdentifier {
    /// Path of the item's JSON inside the backup tarball
    pub fn item_path(&self) -> PathBuf {
        let mut path = PathBuf::from("resources");
        path.push(&self.group_resource);
        if self.namespace.is_empty() {
            path.push("cluster");
        } else {
            path.push("namespaces");
            path.push(&self.namespace);
        }
        path.push(format!("{}.json", self.name));
        path
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.group_resource, self.name)
        } else {
            write!(f, "{}/{}/{}", self.group_resource, self.namespace, self.name)
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    #[serde(default)]
    pub phase: OperationPhase,

    /// Error reported by the plugin when the operation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum OperationPhase {
    #[default]
    #[serde(alias = "New")]
    InProgress,
    Completed,
    Failed,
}

impl BackupItemOperation {
    pub fn phase(&self) -> OperationPhase {
        self.status.phase
    }

    /// The operation reached Completed or Failed
    pub fn is_concluded(&self) -> bool {
        matches!(self.phase(), OperationPhase::Completed | OperationPhase::Failed)
    }
}

/// Outcome counts over a list of operations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationSummary {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
}

impl OperationSummary {
    pub fn of(operations: &[BackupItemOperation]) -> Self {
        let mut summary = Self {
            attempted: operations.len(),
            ..Self::default()
        };
        for op in operations {
            match op.phase() {
                OperationPhase::Completed => summary.completed += 1,
                OperationPhase::Failed => summary.failed += 1,
                OperationPhase::InProgress => summary.in_progress += 1,
            }
        }
        summary
    }

    /// Every operation completed successfully (vacuously true for none)
    pub fn all_completed(&self) -> bool {
        self.completed == self.attempted
    }
}
