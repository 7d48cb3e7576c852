//! Reading and patching Backup objects

use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::crd::{Backup, BackupStorageLocation};
use crate::error::{Error, Result};

/// Field manager used for every patch this operator sends
pub const FIELD_MANAGER: &str = "backup-finalizer-operator";

/// Access to Backup and BackupStorageLocation objects
#[async_trait]
pub trait BackupRecords: Send + Sync {
    /// Fetch a backup; `None` when it does not exist
    async fn get_backup(&self, namespace: &str, name: &str) -> Result<Option<Backup>>;

    async fn get_storage_location(&self, namespace: &str, name: &str)
        -> Result<BackupStorageLocation>;

    /// Send whatever changed between `original` and `updated`
    async fn patch_backup(&self, original: &Backup, updated: &Backup) -> Result<()>;
}

/// [`BackupRecords`] backed by the API server
#[derive(Clone)]
pub struct KubeBackupRecords {
    client: Client,
}

impl KubeBackupRecords {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackupRecords for KubeBackupRecords {
    async fn get_backup(&self, namespace: &str, name: &str) -> Result<Option<Backup>> {
        let api: Api<Backup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_storage_location(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BackupStorageLocation> {
        let api: Api<BackupStorageLocation> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found("BackupStorageLocation", format!("{}/{}", namespace, name)))
    }

    async fn patch_backup(&self, original: &Backup, updated: &Backup) -> Result<()> {
        let name = updated.name_any();
        let namespace = updated.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Backup> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams::apply(FIELD_MANAGER);

        let status_patch = merge_patch(
            &serde_json::to_value(&original.status)?,
            &serde_json::to_value(&updated.status)?,
        );
        if let Some(status) = status_patch {
            debug!(name = %name, patch = %status, "Patching backup status");
            let patch = serde_json::json!({ "status": status });
            api.patch_status(&name, &params, &Patch::Merge(patch)).await?;
        }

        let labels_patch = merge_patch(
            &serde_json::to_value(&original.metadata.labels)?,
            &serde_json::to_value(&updated.metadata.labels)?,
        );
        if let Some(labels) = labels_patch {
            debug!(name = %name, patch = %labels, "Patching backup labels");
            let patch = serde_json::json!({ "metadata": { "labels": labels } });
            api.patch(&name, &params, &Patch::Merge(patch)).await?;
        }

        Ok(())
    }
}

/// JSON merge patch (RFC 7386) turning `original` into `updated`.
///
/// Returns `None` when the two are equal.
pub fn merge_patch(original: &Value, updated: &Value) -> Option<Value> {
    if original == updated {
        return None;
    }

    match (original, updated) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, value) in after {
                let previous = before.get(key).unwrap_or(&Value::Null);
                if let Some(diff) = merge_patch(previous, value) {
                    patch.insert(key.clone(), diff);
                }
            }
            for key in before.keys() {
                if !after.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Some(Value::Object(patch))
        }
        // Objects appearing where there was nothing are sent whole
        _ => Some(updated.clone()),
    }
}
