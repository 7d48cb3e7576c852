//! Backup Finalizer Kubernetes Operator
//!
//! Finalizes backups once their async plugin operations have concluded and
//! cleans up the data mover resources left behind by backups and restores.

pub mod archive;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod datamover;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod storage;

pub use error::{Error, Result};
