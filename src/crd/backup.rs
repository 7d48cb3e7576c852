//! Backup Custom Resource Definition

use std::fmt;
use std::str::FromStr;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Label carrying the name of the schedule that created a backup
pub const SCHEDULE_NAME_LABEL: &str = "velero.io/schedule-name";

/// Label carrying the name of the backup a resource belongs to
pub const BACKUP_NAME_LABEL: &str = "velero.io/backup-name";

/// Backup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    namespaced,
    status = "BackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Completed", "type": "date", "jsonPath": ".status.completionTimestamp"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Name of the BackupStorageLocation the backup is stored in
    #[serde(default)]
    pub storage_location: String,

    /// Namespaces included in the backup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,

    /// Retention period (e.g. "720h0m0s")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    /// Fields this operator does not interpret, kept so the object
    /// serializes back in full
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Backup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Current phase, see [`BackupPhase`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Backup format version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,

    /// When the backup started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    /// When the backup reached a terminal phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// When the backup becomes eligible for garbage collection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    /// Number of errors encountered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<i32>,

    /// Number of warnings encountered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<i32>,

    /// Async item operations started by plugins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_backup_item_operations_attempted: Option<i32>,

    /// Async item operations that completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_backup_item_operations_completed: Option<i32>,

    /// Async item operations that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_backup_item_operations_failed: Option<i32>,

    /// Reason the backup failed, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Status fields owned by the backup server (progress, snapshot counts, ...)
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Lifecycle phase of a backup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackupPhase {
    New,
    FailedValidation,
    InProgress,
    WaitingForPluginOperations,
    WaitingForPluginOperationsPartiallyFailed,
    FinalizingAfterPluginOperations,
    FinalizingAfterPluginOperationsPartiallyFailed,
    Completed,
    PartiallyFailed,
    Failed,
}

impl BackupPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupPhase::New => "New",
            BackupPhase::FailedValidation => "FailedValidation",
            BackupPhase::InProgress => "InProgress",
            BackupPhase::WaitingForPluginOperations => "WaitingForPluginOperations",
            BackupPhase::WaitingForPluginOperationsPartiallyFailed => {
                "WaitingForPluginOperationsPartiallyFailed"
            }
            BackupPhase::FinalizingAfterPluginOperations => "FinalizingAfterPluginOperations",
            BackupPhase::FinalizingAfterPluginOperationsPartiallyFailed => {
                "FinalizingAfterPluginOperationsPartiallyFailed"
            }
            BackupPhase::Completed => "Completed",
            BackupPhase::PartiallyFailed => "PartiallyFailed",
            BackupPhase::Failed => "Failed",
        }
    }

    /// Terminal phases never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupPhase::Completed
                | BackupPhase::PartiallyFailed
                | BackupPhase::Failed
                | BackupPhase::FailedValidation
        )
    }

    /// Phases handled by the finalizer
    pub fn is_finalizing(&self) -> bool {
        matches!(
            self,
            BackupPhase::FinalizingAfterPluginOperations
                | BackupPhase::FinalizingAfterPluginOperationsPartiallyFailed
        )
    }

    /// Phases a backup may move to from this one
    pub fn allowed_transitions(&self) -> &'static [BackupPhase] {
        use BackupPhase::*;
        match self {
            New => &[FailedValidation, InProgress],
            InProgress => &[
                WaitingForPluginOperations,
                WaitingForPluginOperationsPartiallyFailed,
                FinalizingAfterPluginOperations,
                FinalizingAfterPluginOperationsPartiallyFailed,
                Completed,
                PartiallyFailed,
                Failed,
            ],
            WaitingForPluginOperations => &[
                WaitingForPluginOperationsPartiallyFailed,
                FinalizingAfterPluginOperations,
                FinalizingAfterPluginOperationsPartiallyFailed,
                Failed,
            ],
            WaitingForPluginOperationsPartiallyFailed => {
                &[FinalizingAfterPluginOperationsPartiallyFailed, Failed]
            }
            FinalizingAfterPluginOperations => &[Completed, PartiallyFailed, Failed],
            FinalizingAfterPluginOperationsPartiallyFailed => &[PartiallyFailed, Failed],
            Completed | PartiallyFailed | Failed | FailedValidation => &[],
        }
    }

    /// Validate a move to `next` against the transition table
    pub fn transition_to(self, next: BackupPhase) -> Result<BackupPhase> {
        if self.allowed_transitions().contains(&next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let phase = match s {
            // An unset phase is treated as a freshly created backup
            "" | "New" => BackupPhase::New,
            "FailedValidation" => BackupPhase::FailedValidation,
            "InProgress" => BackupPhase::InProgress,
            "WaitingForPluginOperations" => BackupPhase::WaitingForPluginOperations,
            "WaitingForPluginOperationsPartiallyFailed" => {
                BackupPhase::WaitingForPluginOperationsPartiallyFailed
            }
            "FinalizingAfterPluginOperations" => BackupPhase::FinalizingAfterPluginOperations,
            "FinalizingAfterPluginOperationsPartiallyFailed" => {
                BackupPhase::FinalizingAfterPluginOperationsPartiallyFailed
            }
            "Completed" => BackupPhase::Completed,
            "PartiallyFailed" => BackupPhase::PartiallyFailed,
            "Failed" => BackupPhase::Failed,
            other => {
                return Err(Error::UnknownPhase {
                    kind: "Backup",
                    phase: other.to_string(),
                })
            }
        };
        Ok(phase)
    }
}

impl Backup {
    /// Parsed phase of the backup
    pub fn phase(&self) -> Result<BackupPhase> {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or_default()
            .parse()
    }

    /// Set the phase, creating the status if needed
    pub fn set_phase(&mut self, phase: BackupPhase) {
        self.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
    }

    /// Backup finished successfully
    pub fn is_completed(&self) -> bool {
        matches!(self.phase(), Ok(BackupPhase::Completed))
    }

    /// Backup reached a phase it will not leave
    pub fn is_finished(&self) -> bool {
        self.phase().map(|p| p.is_terminal()).unwrap_or(false)
    }

    /// Name of the schedule that created this backup, empty for manual backups
    pub fn schedule_name(&self) -> String {
        self.labels()
            .get(SCHEDULE_NAME_LABEL)
            .cloned()
            .unwrap_or_default()
    }
}
