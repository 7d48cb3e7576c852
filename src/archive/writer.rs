//! Writing gzip tar streams

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;

use crate::error::{Result, ResultExt};

/// Write the files at `paths` (relative to `root`) into a gzip tar stream.
///
/// Entries keep their relative path and executable bit; ownership and
/// timestamps are normalized. Returns the underlying writer once the stream
/// has been finished.
pub fn write_tarball<W: Write>(out: W, root: &Path, paths: &[PathBuf]) -> Result<W> {
    let mut builder = Builder::new(GzEncoder::new(out, Compression::default()));
    builder.mode(tar::HeaderMode::Deterministic);

    for path in paths {
        builder
            .append_path_with_name(root.join(path), path)
            .with_context(|| format!("adding {} to tarball", path.display()))?;
    }

    let encoder = builder.into_inner().with_context(|| "finishing tar stream")?;
    let out = encoder.finish().with_context(|| "finishing gzip stream")?;
    Ok(out)
}
