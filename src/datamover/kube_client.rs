//! Kubernetes-backed implementation of the data mover queries

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams},
    Api, Client, ResourceExt,
};

use crate::crd::{Backup, Restore, VolumeSnapshotBackup, VolumeSnapshotRestore};
use crate::error::{Error, Result, ResultExt};

use super::store::{MoverKind, MoverStore, ParentOperation, ParentStore, ResourceRef, TrackedResource};

/// Queries VolumeSnapshotBackup/Restore objects and their parents through the API server
#[derive(Clone)]
pub struct KubeDataMoverClient {
    client: Client,
}

impl KubeDataMoverClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn map_not_found(err: kube::Error, kind: &'static str, reference: &ResourceRef) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::not_found(kind, reference.to_string()),
        _ => Error::Kube(err),
    }
}

#[async_trait]
impl MoverStore for KubeDataMoverClient {
    async fn get(&self, kind: MoverKind, reference: &ResourceRef) -> Result<TrackedResource> {
        let resource = match kind {
            MoverKind::Backup => {
                let api: Api<VolumeSnapshotBackup> =
                    Api::namespaced(self.client.clone(), &reference.namespace);
                api.get(&reference.name).await.map(TrackedResource::from)
            }
            MoverKind::Restore => {
                let api: Api<VolumeSnapshotRestore> =
                    Api::namespaced(self.client.clone(), &reference.namespace);
                api.get(&reference.name).await.map(TrackedResource::from)
            }
        };
        resource.map_err(|e| map_not_found(e, kind.resource_kind(), reference))
    }

    async fn list_by_parent(&self, kind: MoverKind, parent: &str) -> Result<Vec<TrackedResource>> {
        let params = ListParams::default().labels(&format!("{}={}", kind.parent_label(), parent));
        let items: kube::Result<Vec<TrackedResource>> = match kind {
            MoverKind::Backup => Api::<VolumeSnapshotBackup>::all(self.client.clone())
                .list(&params)
                .await
                .map(|list| list.items.into_iter().map(TrackedResource::from).collect()),
            MoverKind::Restore => Api::<VolumeSnapshotRestore>::all(self.client.clone())
                .list(&params)
                .await
                .map(|list| list.items.into_iter().map(TrackedResource::from).collect()),
        };
        items.with_context(|| format!("listing {}s of {} {}", kind, kind.parent_kind(), parent))
    }

    async fn list_all(&self, kind: MoverKind) -> Result<Vec<TrackedResource>> {
        let params = ListParams::default();
        let items: kube::Result<Vec<TrackedResource>> = match kind {
            MoverKind::Backup => Api::<VolumeSnapshotBackup>::all(self.client.clone())
                .list(&params)
                .await
                .map(|list| list.items.into_iter().map(TrackedResource::from).collect()),
            MoverKind::Restore => Api::<VolumeSnapshotRestore>::all(self.client.clone())
                .list(&params)
                .await
                .map(|list| list.items.into_iter().map(TrackedResource::from).collect()),
        };
        items.with_context(|| format!("listing {}s", kind))
    }

    async fn delete(&self, kind: MoverKind, reference: &ResourceRef) -> Result<()> {
        let params = DeleteParams::default();
        let result = match kind {
            MoverKind::Backup => {
                Api::<VolumeSnapshotBackup>::namespaced(self.client.clone(), &reference.namespace)
                    .delete(&reference.name, &params)
                    .await
                    .map(|_| ())
            }
            MoverKind::Restore => {
                Api::<VolumeSnapshotRestore>::namespaced(self.client.clone(), &reference.namespace)
                    .delete(&reference.name, &params)
                    .await
                    .map(|_| ())
            }
        };
        result.map_err(|e| map_not_found(e, kind.resource_kind(), reference))
    }
}

#[async_trait]
impl ParentStore for KubeDataMoverClient {
    async fn list_parents(&self, kind: MoverKind) -> Result<Vec<ParentOperation>> {
        let params = ListParams::default();
        let parents: kube::Result<Vec<ParentOperation>> = match kind {
            MoverKind::Backup => Api::<Backup>::all(self.client.clone())
                .list(&params)
                .await
                .map(|list| {
                    list.items
                        .into_iter()
                        .map(|b| ParentOperation {
                            uid: b.uid().unwrap_or_default(),
                            reference: ResourceRef::new(b.namespace().unwrap_or_default(), b.name_any()),
                            completed: b.is_completed(),
                        })
                        .collect()
                }),
            MoverKind::Restore => Api::<Restore>::all(self.client.clone())
                .list(&params)
                .await
                .map(|list| {
                    list.items
                        .into_iter()
                        .map(|r| ParentOperation {
                            uid: r.uid().unwrap_or_default(),
                            reference: ResourceRef::new(r.namespace().unwrap_or_default(), r.name_any()),
                            completed: r.is_completed(),
                        })
                        .collect()
                }),
        };
        parents.with_context(|| format!("listing {}s", kind.parent_kind()))
    }

    async fn parent_exists(&self, kind: MoverKind, reference: &ResourceRef) -> Result<bool> {
        let found = match kind {
            MoverKind::Backup => Api::<Backup>::namespaced(self.client.clone(), &reference.namespace)
                .get_opt(&reference.name)
                .await
                .map(|b| b.is_some()),
            MoverKind::Restore => Api::<Restore>::namespaced(self.client.clone(), &reference.namespace)
                .get_opt(&reference.name)
                .await
                .map(|r| r.is_some()),
        };
        Ok(found?)
    }
}
