//! Backup tarball handling
//!
//! Backups are stored as gzip-compressed tar streams. Final updates to a
//! backup are shipped as additional layers whose entries shadow earlier
//! layers at the same path.

mod extractor;
mod writer;

pub use extractor::*;
pub use writer::*;
