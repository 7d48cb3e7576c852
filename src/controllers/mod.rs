//! Kubernetes controllers
//!
//! This module contains the controller loops that watch Backup and Restore
//! objects and trigger finalization and data mover cleanup.

mod backup_finalizer_controller;
mod data_mover_controller;

pub use backup_finalizer_controller::run as run_backup_finalizer_controller;
pub use data_mover_controller::{run as run_data_mover_controller, MoverParent};

use std::fmt::Debug;
use std::sync::Arc;

use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::config::OperatorConfig;
use crate::datamover::StaleResourceReaper;
use crate::reconcilers::BackupFinalizer;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Backup finalization logic
    pub finalizer: Arc<BackupFinalizer>,
    /// Data mover cleanup logic
    pub reaper: Arc<StaleResourceReaper>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        config: OperatorConfig,
        finalizer: Arc<BackupFinalizer>,
        reaper: Arc<StaleResourceReaper>,
    ) -> Self {
        Self {
            client,
            config,
            finalizer,
            reaper,
        }
    }

    /// Api scoped to the watched namespace, or cluster-wide
    pub fn watched_api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        match self.config.watch_namespace.as_deref() {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}
