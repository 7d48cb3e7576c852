//! Data mover Custom Resource Definitions
//!
//! VolumeSnapshotBackup and VolumeSnapshotRestore objects are created and
//! driven by the external data mover controller. This operator only reads
//! their status and deletes them once they are no longer needed.

use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Condition type reported by the data mover once it has reconciled an object
pub const CONDITION_RECONCILED: &str = "Reconciled";

/// Reason attached to a failed `Reconciled` condition
pub const REASON_ERROR: &str = "Error";

/// VolumeSnapshotBackup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datamover.oadp.openshift.io",
    version = "v1alpha1",
    kind = "VolumeSnapshotBackup",
    plural = "volumesnapshotbackups",
    singular = "volumesnapshotbackup",
    shortname = "vsb",
    namespaced,
    status = "MoverStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotBackupSpec {
    /// Namespace the protected application lives in
    #[serde(default)]
    pub protected_namespace: String,

    /// VolumeSnapshotContent being moved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content: Option<String>,
}

/// VolumeSnapshotRestore resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "datamover.oadp.openshift.io",
    version = "v1alpha1",
    kind = "VolumeSnapshotRestore",
    plural = "volumesnapshotrestores",
    singular = "volumesnapshotrestore",
    shortname = "vsr",
    namespaced,
    status = "MoverStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotRestoreSpec {
    /// Namespace the protected application lives in
    #[serde(default)]
    pub protected_namespace: String,

    /// Name of the VolumeSnapshotBackup being restored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_backup_name: Option<String>,
}

/// Status shared by both data mover kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoverStatus {
    /// Transfer phase
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(with = "MoverPhase")]
    pub phase: MoverPhase,

    /// Status conditions, in the order the data mover reported them
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    #[schemars(with = "Vec<MoverCondition>")]
    pub conditions: Vec<MoverCondition>,
}

/// The data mover writes explicit nulls for fields it has not set yet
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Phase of a data mover transfer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum MoverPhase {
    #[default]
    #[serde(alias = "")]
    New,
    InProgress,
    Completed,
    Failed,
    PartiallyFailed,
    /// Any phase this operator does not know about; never terminal
    #[serde(other)]
    Unknown,
}

impl MoverPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoverPhase::New => "New",
            MoverPhase::InProgress => "InProgress",
            MoverPhase::Completed => "Completed",
            MoverPhase::Failed => "Failed",
            MoverPhase::PartiallyFailed => "PartiallyFailed",
            MoverPhase::Unknown => "Unknown",
        }
    }

    /// Phases that make a failed `Reconciled` condition fatal
    pub fn is_failed(&self) -> bool {
        matches!(self, MoverPhase::Failed | MoverPhase::PartiallyFailed)
    }
}

impl fmt::Display for MoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status condition as reported by the data mover
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoverCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last transition time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl MoverCondition {
    /// `Reconciled=False` with reason `Error`
    pub fn is_reconcile_error(&self) -> bool {
        self.type_ == CONDITION_RECONCILED && self.status == "False" && self.reason == REASON_ERROR
    }
}
