//! Integration tests for data mover resource cleanup

mod common;

use std::sync::Arc;
use std::time::Duration;

use backup_finalizer_operator::crd::MoverPhase;
use backup_finalizer_operator::datamover::{
    CompletionWaiter, MoverKind, ParentOperation, ResourceRef, StaleResourceReaper,
};
use backup_finalizer_operator::Error;
use tokio_test::{assert_err, assert_ok};

use common::{failed, parent, tracked, FakeMoverStore, FakeParentStore};

// ============================================================================
// Test Helpers
// ============================================================================

struct Fixture {
    movers: Arc<FakeMoverStore>,
    parents: Arc<FakeParentStore>,
    reaper: StaleResourceReaper,
}

fn fixture() -> Fixture {
    let movers = FakeMoverStore::new();
    let parents = FakeParentStore::new();
    let waiter = CompletionWaiter::new(movers.clone())
        .with_poll_interval(Duration::from_secs(1))
        .with_timeout(Duration::from_secs(30));
    let reaper = StaleResourceReaper::new(movers.clone(), parents.clone(), waiter);
    Fixture {
        movers,
        parents,
        reaper,
    }
}

fn refs(names: &[&str]) -> Vec<ResourceRef> {
    let mut refs: Vec<ResourceRef> = names.iter().map(|n| ResourceRef::new("app", *n)).collect();
    refs.sort();
    refs
}

fn sorted(mut refs: Vec<ResourceRef>) -> Vec<ResourceRef> {
    refs.sort();
    refs
}

/// Parent living in the same namespace as its resources
fn parent_in_app(name: &str, completed: bool) -> ParentOperation {
    ParentOperation {
        uid: format!("uid-{}", name),
        reference: ResourceRef::new("app", name),
        completed,
    }
}

// ============================================================================
// Parent Cleanup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn parent_resources_are_deleted_after_completing() {
    let f = fixture();
    let kind = MoverKind::Backup;
    f.movers.script(
        kind,
        vec![
            tracked("app", "x", Some("b1"), MoverPhase::InProgress),
            tracked("app", "x", Some("b1"), MoverPhase::Completed),
        ],
    );
    f.movers.insert(kind, tracked("app", "y", Some("b1"), MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "other", Some("b2"), MoverPhase::Completed));

    let report = assert_ok!(f.reaper.reap_parent(kind, "b1").await);

    assert_eq!(sorted(report.deleted), refs(&["x", "y"]));
    assert!(report.warnings.is_empty());
    assert_eq!(f.movers.remaining(kind), refs(&["other"]));
}

#[tokio::test(start_paused = true)]
async fn parent_with_failed_resource_deletes_nothing() {
    let f = fixture();
    let kind = MoverKind::Backup;
    f.movers.insert(kind, tracked("app", "ok", Some("b1"), MoverPhase::Completed));
    f.movers.insert(kind, failed("app", "bad", Some("b1")));

    let err = assert_err!(f.reaper.reap_parent(kind, "b1").await);

    assert!(matches!(err.root(), Error::MoverFailed { .. }), "{err}");
    assert!(err.to_string().contains("b1"), "{err}");
    assert!(f.movers.deleted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn parent_without_resources_is_a_no_op() {
    let f = fixture();

    let report = assert_ok!(f.reaper.reap_parent(MoverKind::Restore, "r1").await);

    assert!(report.deleted.is_empty());
    assert!(report.is_clean());
}

// ============================================================================
// Sibling Cleanup
// ============================================================================

#[tokio::test]
async fn only_completed_resources_of_completed_siblings_are_deleted() {
    let f = fixture();
    let kind = MoverKind::Restore;
    f.parents.add(kind, parent("r-current", true));
    f.parents.add(kind, parent("r-old", true));
    f.parents.add(kind, parent("r-running", false));
    f.movers.insert(kind, tracked("app", "a", Some("r-old"), MoverPhase::Completed));
    f.movers.insert(kind, failed("app", "b", Some("r-old")));
    f.movers.insert(kind, tracked("app", "c", Some("r-old"), MoverPhase::InProgress));
    f.movers.insert(kind, tracked("app", "d", Some("r-running"), MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "e", Some("r-current"), MoverPhase::Completed));

    let report = assert_ok!(f.reaper.reap_completed_siblings(kind, "uid-r-current").await);

    assert_eq!(report.deleted, refs(&["a"]));
    assert_eq!(f.movers.remaining(kind), refs(&["b", "c", "d", "e"]));
}

#[tokio::test]
async fn failed_deletion_is_reported_and_sweep_continues() {
    let f = fixture();
    let kind = MoverKind::Backup;
    f.parents.add(kind, parent("b-old", true));
    f.movers.insert(kind, tracked("app", "stuck", Some("b-old"), MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "fine", Some("b-old"), MoverPhase::Completed));
    f.movers.fail_delete(ResourceRef::new("app", "stuck"));

    let report = assert_ok!(f.reaper.reap_completed_siblings(kind, "uid-b-new").await);

    assert_eq!(report.deleted, refs(&["fine"]));
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].resource, ResourceRef::new("app", "stuck"));
    assert!(!report.is_clean());
    assert_eq!(f.movers.remaining(kind), refs(&["stuck"]));
}

// ============================================================================
// Dangling Cleanup
// ============================================================================

#[tokio::test]
async fn completed_resources_of_deleted_parents_are_removed() {
    let f = fixture();
    let kind = MoverKind::Backup;
    f.parents.add(kind, parent_in_app("alive", true));
    f.parents.fail_lookup(ResourceRef::new("app", "flaky"));
    f.movers.insert(kind, tracked("app", "orphan", Some("gone"), MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "busy-orphan", Some("gone"), MoverPhase::InProgress));
    f.movers.insert(kind, tracked("app", "owned", Some("alive"), MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "unlabeled", None, MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "unknown", Some("flaky"), MoverPhase::Completed));

    let report = assert_ok!(f.reaper.reap_dangling(kind).await);

    assert_eq!(report.deleted, refs(&["orphan"]));
    assert!(report.is_clean());
    assert_eq!(
        f.movers.remaining(kind),
        refs(&["busy-orphan", "owned", "unknown", "unlabeled"])
    );
}

#[tokio::test]
async fn parent_lookup_uses_resource_namespace() {
    let f = fixture();
    let kind = MoverKind::Restore;
    // Same name, different namespace: not the resource's parent
    f.parents.add(kind, parent("r1", true));
    f.movers.insert(kind, tracked("app", "vsr", Some("r1"), MoverPhase::Completed));

    let report = assert_ok!(f.reaper.reap_dangling(kind).await);

    assert_eq!(report.deleted, refs(&["vsr"]));
}

// ============================================================================
// Full Cleanup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn cleanup_sweeps_parent_siblings_and_dangling() {
    let f = fixture();
    let kind = MoverKind::Restore;
    let current = parent_in_app("r1", true);
    f.parents.add(kind, current.clone());
    f.parents.add(kind, parent_in_app("r0", true));
    f.movers.script(
        kind,
        vec![
            tracked("app", "own", Some("r1"), MoverPhase::InProgress),
            tracked("app", "own", Some("r1"), MoverPhase::Completed),
        ],
    );
    f.movers.insert(kind, tracked("app", "sibling", Some("r0"), MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "orphan", Some("gone"), MoverPhase::Completed));
    f.movers.insert(kind, tracked("app", "running", Some("gone"), MoverPhase::InProgress));
    f.movers.insert(MoverKind::Backup, tracked("app", "vsb", Some("gone"), MoverPhase::Completed));

    let report = assert_ok!(f.reaper.cleanup(kind, &current).await);

    assert!(report.is_clean());
    assert_eq!(sorted(report.deleted), refs(&["orphan", "own", "sibling"]));
    assert_eq!(f.movers.remaining(kind), refs(&["running"]));
    assert_eq!(f.movers.remaining(MoverKind::Backup), refs(&["vsb"]));
}

#[tokio::test(start_paused = true)]
async fn cleanup_stops_when_parent_resources_fail() {
    let f = fixture();
    let kind = MoverKind::Backup;
    let current = parent_in_app("b1", true);
    f.parents.add(kind, current.clone());
    f.movers.insert(kind, failed("app", "own", Some("b1")));
    f.movers.insert(kind, tracked("app", "orphan", Some("gone"), MoverPhase::Completed));

    let err = assert_err!(f.reaper.cleanup(kind, &current).await);

    assert!(matches!(err.root(), Error::MoverFailed { .. }), "{err}");
    assert_eq!(f.movers.remaining(kind), refs(&["orphan", "own"]));
}
