//! Custom Resource Definitions consumed by the operator
//!
//! The operator owns none of these definitions; they are installed alongside
//! the backup server and the data mover controller.

mod backup;
mod backup_storage_location;
mod data_mover;
mod restore;

pub use backup::*;
pub use backup_storage_location::*;
pub use data_mover::*;
pub use restore::*;
