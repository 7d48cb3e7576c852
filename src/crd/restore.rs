//! Restore Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the name of the restore a resource belongs to
pub const RESTORE_NAME_LABEL: &str = "velero.io/restore-name";

/// Restore resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "Restore",
    plural = "restores",
    singular = "restore",
    namespaced,
    status = "RestoreStatus",
    printcolumn = r#"{"name": "Backup", "type": "string", "jsonPath": ".spec.backupName"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Backup being restored
    #[serde(default)]
    pub backup_name: String,
}

/// Restore status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    /// Current phase (New, InProgress, WaitingForPluginOperations, Completed, PartiallyFailed, Failed, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Number of errors encountered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<i32>,

    /// Number of warnings encountered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<i32>,
}

impl Restore {
    fn phase_str(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or_default()
    }

    /// Restore finished successfully
    pub fn is_completed(&self) -> bool {
        self.phase_str() == "Completed"
    }

    /// Restore reached a phase it will not leave
    pub fn is_finished(&self) -> bool {
        matches!(
            self.phase_str(),
            "Completed" | "PartiallyFailed" | "Failed" | "FailedValidation"
        )
    }
}
