//! Prometheus metrics for the Backup Finalizer Operator
//!
//! This module exposes metrics for operator health, finalized backups and
//! data mover cleanup.

mod prometheus;

pub use self::prometheus::*;
