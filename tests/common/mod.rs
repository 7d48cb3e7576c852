//! Shared fixtures and in-memory collaborators for the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::AsyncReadExt;

use backup_finalizer_operator::crd::{
    Backup, BackupSpec, BackupStatus, BackupStorageLocation, BackupStorageLocationSpec,
    MoverCondition, MoverPhase, ObjectStorageLocation, SCHEDULE_NAME_LABEL,
};
use backup_finalizer_operator::datamover::{
    MoverKind, MoverStore, ParentOperation, ParentStore, ResourceRef, TrackedResource,
};
use backup_finalizer_operator::reconcilers::BackupRecords;
use backup_finalizer_operator::storage::{
    BackupItemOperation, BackupStore, BackupStoreGetter, ContentStream, OperationPhase,
    OperationSpec, OperationStatus, ResourceIdentifier,
};
use backup_finalizer_operator::{Error, Result};

// ============================================================================
// Tarball fixtures
// ============================================================================

/// One entry of a fixture layer
pub enum Fixture<'a> {
    Dir(&'a str),
    File(&'a str, &'a str),
    FileWithMode(&'a str, &'a str, u32),
    Symlink(&'a str, &'a str),
}

/// Build a gzip tar layer from fixture entries, in order
pub fn layer(entries: &[Fixture<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        match entry {
            Fixture::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .unwrap();
            }
            Fixture::File(path, content) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(content.len() as u64);
                builder
                    .append_data(&mut header, path, content.as_bytes())
                    .unwrap();
            }
            Fixture::FileWithMode(path, content, mode) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(content.len() as u64);
                builder
                    .append_data(&mut header, path, content.as_bytes())
                    .unwrap();
            }
            Fixture::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                header.set_link_name(target).unwrap();
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .unwrap();
            }
        }
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Layer whose single entry has a raw, unchecked path (e.g. `../escape`)
pub fn layer_with_raw_path(path: &str, content: &str) -> Vec<u8> {
    let mut header = tar::Header::new_old();
    {
        let name = &mut header.as_old_mut().name;
        name[..path.len()].copy_from_slice(path.as_bytes());
    }
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(content.len() as u64);
    header.set_cksum();

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.append(&header, content.as_bytes()).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Read every regular file of a gzip tar stream into a path -> content map
pub fn read_layer(bytes: &[u8]) -> BTreeMap<String, String> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut files = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        files.insert(path, content);
    }
    files
}

pub fn read_file(root: &Path, relative: &str) -> String {
    std::fs::read_to_string(root.join(relative)).unwrap()
}

/// Gzip-compressed JSON, the on-disk form of item operation lists
pub fn gzip_json<T: serde::Serialize>(value: &T) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&serde_json::to_vec(value).unwrap())
        .unwrap();
    encoder.finish().unwrap()
}

// ============================================================================
// Object builders
// ============================================================================

pub const NAMESPACE: &str = "velero";
pub const LOCATION: &str = "default";
pub const PVC_ITEM: &str = "resources/persistentvolumeclaims/namespaces/app/data.json";

pub fn backup(name: &str, phase: &str) -> Backup {
    let mut backup = Backup::new(
        name,
        BackupSpec {
            storage_location: LOCATION.to_string(),
            ..Default::default()
        },
    );
    backup.metadata.namespace = Some(NAMESPACE.to_string());
    backup.metadata.uid = Some(format!("uid-{}", name));
    backup.metadata.labels = Some(BTreeMap::from([(
        SCHEDULE_NAME_LABEL.to_string(),
        "nightly".to_string(),
    )]));
    backup.status = Some(BackupStatus {
        phase: Some(phase.to_string()),
        start_timestamp: Some(chrono::Utc::now() - chrono::Duration::minutes(5)),
        ..Default::default()
    });
    backup
}

pub fn location(provider: &str, bucket: &str) -> BackupStorageLocation {
    let mut location = BackupStorageLocation::new(
        LOCATION,
        BackupStorageLocationSpec {
            provider: provider.to_string(),
            object_storage: ObjectStorageLocation {
                bucket: bucket.to_string(),
                prefix: Some("cluster-a".to_string()),
            },
            config: BTreeMap::new(),
            access_mode: "ReadWrite".to_string(),
        },
    );
    location.metadata.namespace = Some(NAMESPACE.to_string());
    location
}

pub fn operation(id: &str, namespace: &str, name: &str, phase: OperationPhase) -> BackupItemOperation {
    BackupItemOperation {
        spec: OperationSpec {
            backup_name: "b1".to_string(),
            backup_uid: "uid-b1".to_string(),
            backup_item_action: "velero.io/csi-pvc-backupper".to_string(),
            resource_identifier: ResourceIdentifier {
                group_resource: "persistentvolumeclaims".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            operation_id: id.to_string(),
        },
        status: OperationStatus {
            phase,
            error: (phase == OperationPhase::Failed).then(|| "snapshot failed".to_string()),
            ..Default::default()
        },
    }
}

pub fn tracked(namespace: &str, name: &str, parent: Option<&str>, phase: MoverPhase) -> TrackedResource {
    TrackedResource {
        reference: ResourceRef::new(namespace, name),
        parent: parent.map(str::to_string),
        phase,
        conditions: Vec::new(),
    }
}

/// A resource the data mover gave up on
pub fn failed(namespace: &str, name: &str, parent: Option<&str>) -> TrackedResource {
    let mut resource = tracked(namespace, name, parent, MoverPhase::Failed);
    resource.conditions.push(MoverCondition {
        type_: "Reconciled".to_string(),
        status: "False".to_string(),
        reason: "Error".to_string(),
        ..Default::default()
    });
    resource
}

pub fn parent(name: &str, completed: bool) -> ParentOperation {
    ParentOperation {
        uid: format!("uid-{}", name),
        reference: ResourceRef::new(NAMESPACE, name),
        completed,
    }
}

// ============================================================================
// Data mover fakes
// ============================================================================

struct ScriptedResource {
    current: TrackedResource,
    upcoming: VecDeque<TrackedResource>,
    gets: usize,
}

/// In-memory mover store. Each `get` advances a resource along its script;
/// once the script runs out the last state repeats.
#[derive(Default)]
pub struct FakeMoverStore {
    resources: Mutex<HashMap<(MoverKind, ResourceRef), ScriptedResource>>,
    deleted: Mutex<Vec<ResourceRef>>,
    failing_deletes: Mutex<HashSet<ResourceRef>>,
    failing_gets: Mutex<HashSet<ResourceRef>>,
}

impl FakeMoverStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, kind: MoverKind, resource: TrackedResource) {
        self.script(kind, vec![resource]);
    }

    /// States returned by successive gets; the first one is also what lists see
    pub fn script(&self, kind: MoverKind, states: Vec<TrackedResource>) {
        let mut states: VecDeque<TrackedResource> = states.into();
        let current = states.front().cloned().expect("script needs a state");
        let key = (kind, current.reference.clone());
        states.pop_front();
        self.resources.lock().unwrap().insert(
            key,
            ScriptedResource {
                current,
                upcoming: states,
                gets: 0,
            },
        );
    }

    /// Drop a resource as if someone else deleted it
    pub fn remove(&self, kind: MoverKind, reference: &ResourceRef) {
        self.resources
            .lock()
            .unwrap()
            .remove(&(kind, reference.clone()));
    }

    pub fn fail_get(&self, reference: ResourceRef) {
        self.failing_gets.lock().unwrap().insert(reference);
    }

    pub fn fail_delete(&self, reference: ResourceRef) {
        self.failing_deletes.lock().unwrap().insert(reference);
    }

    pub fn gets(&self, kind: MoverKind, reference: &ResourceRef) -> usize {
        self.resources
            .lock()
            .unwrap()
            .get(&(kind, reference.clone()))
            .map(|r| r.gets)
            .unwrap_or(0)
    }

    pub fn deleted(&self) -> Vec<ResourceRef> {
        let mut deleted = self.deleted.lock().unwrap().clone();
        deleted.sort();
        deleted
    }

    pub fn remaining(&self, kind: MoverKind) -> Vec<ResourceRef> {
        let mut remaining: Vec<ResourceRef> = self
            .resources
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect();
        remaining.sort();
        remaining
    }
}

#[async_trait]
impl MoverStore for FakeMoverStore {
    async fn get(&self, kind: MoverKind, reference: &ResourceRef) -> Result<TrackedResource> {
        if self.failing_gets.lock().unwrap().contains(reference) {
            return Err(Error::storage("api server unavailable"));
        }
        let mut resources = self.resources.lock().unwrap();
        let scripted = resources
            .get_mut(&(kind, reference.clone()))
            .ok_or_else(|| Error::not_found(kind.resource_kind(), reference.to_string()))?;
        // The first get observes the initial state, later gets advance the script
        if scripted.gets > 0 {
            if let Some(next) = scripted.upcoming.pop_front() {
                scripted.current = next;
            }
        }
        scripted.gets += 1;
        Ok(scripted.current.clone())
    }

    async fn list_by_parent(&self, kind: MoverKind, parent: &str) -> Result<Vec<TrackedResource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), r)| *k == kind && r.current.parent.as_deref() == Some(parent))
            .map(|(_, r)| r.current.clone())
            .collect())
    }

    async fn list_all(&self, kind: MoverKind) -> Result<Vec<TrackedResource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, r)| r.current.clone())
            .collect())
    }

    async fn delete(&self, kind: MoverKind, reference: &ResourceRef) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(reference) {
            return Err(Error::storage(format!("refusing to delete {}", reference)));
        }
        let removed = self
            .resources
            .lock()
            .unwrap()
            .remove(&(kind, reference.clone()));
        match removed {
            Some(_) => {
                self.deleted.lock().unwrap().push(reference.clone());
                Ok(())
            }
            None => Err(Error::not_found(kind.resource_kind(), reference.to_string())),
        }
    }
}

/// In-memory parent lookups
#[derive(Default)]
pub struct FakeParentStore {
    parents: Mutex<Vec<(MoverKind, ParentOperation)>>,
    lookup_errors: Mutex<HashSet<ResourceRef>>,
}

impl FakeParentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, kind: MoverKind, parent: ParentOperation) {
        self.parents.lock().unwrap().push((kind, parent));
    }

    pub fn fail_lookup(&self, reference: ResourceRef) {
        self.lookup_errors.lock().unwrap().insert(reference);
    }
}

#[async_trait]
impl ParentStore for FakeParentStore {
    async fn list_parents(&self, kind: MoverKind) -> Result<Vec<ParentOperation>> {
        Ok(self
            .parents
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn parent_exists(&self, kind: MoverKind, reference: &ResourceRef) -> Result<bool> {
        if self.lookup_errors.lock().unwrap().contains(reference) {
            return Err(Error::storage("api server unavailable"));
        }
        Ok(self
            .parents
            .lock()
            .unwrap()
            .iter()
            .any(|(k, p)| *k == kind && p.reference == *reference))
    }
}

// ============================================================================
// Finalizer fakes
// ============================================================================

/// In-memory Backup / BackupStorageLocation access
#[derive(Default)]
pub struct FakeRecords {
    pub backup: Mutex<Option<Backup>>,
    pub location: Mutex<Option<BackupStorageLocation>>,
    pub patches: Mutex<Vec<(Backup, Backup)>>,
    pub fail_patch: AtomicBool,
}

impl FakeRecords {
    pub fn new(backup: Option<Backup>, location: Option<BackupStorageLocation>) -> Arc<Self> {
        Arc::new(Self {
            backup: Mutex::new(backup),
            location: Mutex::new(location),
            ..Default::default()
        })
    }

    pub fn stored(&self) -> Option<Backup> {
        self.backup.lock().unwrap().clone()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }
}

#[async_trait]
impl BackupRecords for FakeRecords {
    async fn get_backup(&self, _namespace: &str, _name: &str) -> Result<Option<Backup>> {
        Ok(self.backup.lock().unwrap().clone())
    }

    async fn get_storage_location(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BackupStorageLocation> {
        self.location
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_found("BackupStorageLocation", format!("{}/{}", namespace, name)))
    }

    async fn patch_backup(&self, original: &Backup, updated: &Backup) -> Result<()> {
        self.patches
            .lock()
            .unwrap()
            .push((original.clone(), updated.clone()));
        if self.fail_patch.load(Ordering::SeqCst) {
            return Err(Error::storage("patch rejected"));
        }
        *self.backup.lock().unwrap() = Some(updated.clone());
        Ok(())
    }
}

/// In-memory backup store recording every call in order
#[derive(Default)]
pub struct FakeBackupStore {
    pub operations: Mutex<Vec<BackupItemOperation>>,
    pub contents: Mutex<Option<Vec<u8>>>,
    pub final_updates: Mutex<Option<Vec<u8>>>,
    pub metadata: Mutex<Option<Vec<u8>>>,
    pub calls: Mutex<Vec<&'static str>>,
    pub fail_final_upload: AtomicBool,
}

impl FakeBackupStore {
    pub fn new(operations: Vec<BackupItemOperation>, contents: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            operations: Mutex::new(operations),
            contents: Mutex::new(Some(contents)),
            ..Default::default()
        })
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploaded_metadata(&self) -> Option<Backup> {
        self.metadata
            .lock()
            .unwrap()
            .as_ref()
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
    }

    pub fn uploaded_final_updates(&self) -> Option<Vec<u8>> {
        self.final_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupStore for FakeBackupStore {
    async fn get_backup_item_operations(&self, _name: &str) -> Result<Vec<BackupItemOperation>> {
        self.record("get_backup_item_operations");
        Ok(self.operations.lock().unwrap().clone())
    }

    async fn get_backup_contents(&self, name: &str) -> Result<Vec<u8>> {
        self.record("get_backup_contents");
        self.contents
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_found("BackupContents", name))
    }

    async fn get_backup_contents_final_updates(&self, _name: &str) -> Result<Option<Vec<u8>>> {
        self.record("get_backup_contents_final_updates");
        Ok(self.final_updates.lock().unwrap().clone())
    }

    async fn put_backup_metadata(&self, _name: &str, metadata: Vec<u8>) -> Result<()> {
        self.record("put_backup_metadata");
        *self.metadata.lock().unwrap() = Some(metadata);
        Ok(())
    }

    async fn put_backup_contents_final_updates(
        &self,
        _name: &str,
        mut contents: ContentStream,
    ) -> Result<()> {
        self.record("put_backup_contents_final_updates");
        if self.fail_final_upload.load(Ordering::SeqCst) {
            return Err(Error::storage("upload interrupted"));
        }
        let mut bytes = Vec::new();
        contents.read_to_end(&mut bytes).await?;
        *self.final_updates.lock().unwrap() = Some(bytes);
        Ok(())
    }
}

/// Always hands out the same fake store
pub struct FakeStoreGetter {
    pub store: Arc<FakeBackupStore>,
    pub gets: AtomicUsize,
}

impl FakeStoreGetter {
    pub fn new(store: Arc<FakeBackupStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            gets: AtomicUsize::new(0),
        })
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl BackupStoreGetter for FakeStoreGetter {
    fn get(&self, _location: &BackupStorageLocation) -> Result<Arc<dyn BackupStore>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}
