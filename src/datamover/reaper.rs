//! Garbage collection of finished data mover resources

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result, ResultExt};
use crate::metrics;

use super::store::{MoverKind, MoverStore, ParentOperation, ParentStore, ResourceRef, TrackedResource};
use super::waiter::CompletionWaiter;

/// A resource that could not be deleted during a sweep
#[derive(Debug)]
pub struct ReapWarning {
    pub resource: ResourceRef,
    pub error: Error,
}

/// Outcome of one or more sweeps
#[derive(Debug, Default)]
pub struct ReapReport {
    pub deleted: Vec<ResourceRef>,
    pub warnings: Vec<ReapWarning>,
}

impl ReapReport {
    pub fn merge(&mut self, other: ReapReport) {
        self.deleted.extend(other.deleted);
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Deletes tracked resources that are Completed and no longer needed.
///
/// Resources in any other phase are never deleted; failed transfers stay
/// around so operators can inspect them. A failed deletion is recorded as a
/// warning and the sweep carries on with the remaining resources.
pub struct StaleResourceReaper {
    movers: Arc<dyn MoverStore>,
    parents: Arc<dyn ParentStore>,
    waiter: CompletionWaiter,
}

impl StaleResourceReaper {
    pub fn new(
        movers: Arc<dyn MoverStore>,
        parents: Arc<dyn ParentStore>,
        waiter: CompletionWaiter,
    ) -> Self {
        Self {
            movers,
            parents,
            waiter,
        }
    }

    /// Full cleanup after `parent` finished: its own resources, those of
    /// other completed parents of the same kind, and dangling ones.
    pub async fn cleanup(&self, kind: MoverKind, parent: &ParentOperation) -> Result<ReapReport> {
        let mut report = self.reap_parent(kind, &parent.reference.name).await?;
        report.merge(self.reap_completed_siblings(kind, &parent.uid).await?);
        report.merge(self.reap_dangling(kind).await?);

        info!(
            kind = %kind,
            parent = %parent.reference,
            deleted = report.deleted.len(),
            warnings = report.warnings.len(),
            "Data mover cleanup finished"
        );
        Ok(report)
    }

    /// Wait for the parent's resources to complete, then delete the Completed ones
    pub async fn reap_parent(&self, kind: MoverKind, parent: &str) -> Result<ReapReport> {
        let resources = self.movers.list_by_parent(kind, parent).await?;
        if resources.is_empty() {
            return Ok(ReapReport::default());
        }

        let references: Vec<ResourceRef> =
            resources.iter().map(|r| r.reference.clone()).collect();
        self.waiter.wait(kind, &references).await.with_context(|| {
            format!(
                "waiting for {}s of {} {} to complete",
                kind,
                kind.parent_kind(),
                parent
            )
        })?;

        let current = self.movers.list_by_parent(kind, parent).await?;
        Ok(self.delete_completed(kind, current).await)
    }

    /// Delete Completed resources of every other Completed parent
    pub async fn reap_completed_siblings(
        &self,
        kind: MoverKind,
        exclude_uid: &str,
    ) -> Result<ReapReport> {
        let mut report = ReapReport::default();
        for sibling in self.parents.list_parents(kind).await? {
            if sibling.uid == exclude_uid {
                continue;
            }
            if !sibling.completed {
                debug!(parent = %sibling.reference, "Ignoring unfinished {}", kind.parent_kind());
                continue;
            }

            let resources = self.movers.list_by_parent(kind, &sibling.reference.name).await?;
            if resources.is_empty() {
                continue;
            }
            info!(
                parent = %sibling.reference,
                "Cleaning up {}s from completed {}",
                kind,
                kind.parent_kind()
            );
            report.merge(self.delete_completed(kind, resources).await);
        }
        Ok(report)
    }

    /// Delete Completed resources whose labeled parent no longer exists
    pub async fn reap_dangling(&self, kind: MoverKind) -> Result<ReapReport> {
        let mut report = ReapReport::default();
        for resource in self.movers.list_all(kind).await? {
            if !resource.is_completed() {
                continue;
            }
            let Some(parent) = resource.parent.as_deref() else {
                continue;
            };

            let parent_ref = ResourceRef::new(resource.reference.namespace.clone(), parent);
            match self.parents.parent_exists(kind, &parent_ref).await {
                Ok(true) => continue,
                Ok(false) => {
                    info!(resource = %resource.reference, "Removing dangling {}", kind);
                    self.delete_one(kind, &resource.reference, &mut report).await;
                }
                Err(e) => {
                    warn!(
                        resource = %resource.reference,
                        parent = %parent_ref,
                        error = %e,
                        "Could not look up {}, skipping",
                        kind.parent_kind()
                    );
                }
            }
        }
        Ok(report)
    }

    async fn delete_completed(&self, kind: MoverKind, resources: Vec<TrackedResource>) -> ReapReport {
        let mut report = ReapReport::default();
        for resource in resources {
            if !resource.is_completed() {
                debug!(
                    resource = %resource.reference,
                    phase = %resource.phase,
                    "Keeping {} that is not Completed",
                    kind
                );
                continue;
            }
            info!(resource = %resource.reference, "Cleaning up completed {}", kind);
            self.delete_one(kind, &resource.reference, &mut report).await;
        }
        report
    }

    async fn delete_one(&self, kind: MoverKind, reference: &ResourceRef, report: &mut ReapReport) {
        match self.movers.delete(kind, reference).await {
            Ok(()) => {
                metrics::MOVER_DELETIONS
                    .with_label_values(&[kind.resource_kind(), "deleted"])
                    .inc();
                report.deleted.push(reference.clone());
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %reference, "{} already gone", kind);
            }
            Err(e) => {
                warn!(resource = %reference, error = %e, "Failed to delete completed {}", kind);
                metrics::MOVER_DELETIONS
                    .with_label_values(&[kind.resource_kind(), "error"])
                    .inc();
                report.warnings.push(ReapWarning {
                    resource: reference.clone(),
                    error: e,
                });
            }
        }
    }
}
