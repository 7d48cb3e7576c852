//! Overlay extraction of ordered tar layers

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, Entry};
use tracing::{debug, info};

use crate::error::{Error, Result, ResultExt};

/// Mode for parent directories that have no entry of their own
const IMPLICIT_DIR_MODE: u32 = 0o755;

/// Extract ordered gzip tar layers into `dest`.
///
/// Layers are applied base first. Within a layer entries are applied in
/// stream order. A regular file replaces whatever an earlier layer wrote at
/// the same path; directories are created if missing and never removed.
/// Entry types other than directories and regular files are skipped.
///
/// The first error aborts the merge. Anything already written to `dest` is
/// left in place for the caller to clean up.
pub fn extract_into<I, R>(layers: I, dest: &Path) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: Read,
{
    fs::create_dir_all(dest)
        .with_context(|| format!("creating output directory {}", dest.display()))?;

    let mut applied = 0usize;
    for (index, layer) in layers.into_iter().enumerate() {
        apply_layer(layer, dest).with_context(|| format!("extracting layer {}", index))?;
        applied += 1;
    }

    info!(layers = applied, dest = %dest.display(), "Extracted backup layers");
    Ok(())
}

/// Extract ordered gzip tar layers into a new temporary directory.
///
/// The directory is not removed automatically, on success or failure.
pub fn extract_to_temp_dir<I, R>(layers: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = R>,
    R: Read,
{
    let dir = tempfile::Builder::new()
        .prefix("backup-extract-")
        .tempdir()
        .with_context(|| "creating temp dir")?
        .keep();
    extract_into(layers, &dir)?;
    Ok(dir)
}

fn apply_layer<R: Read>(layer: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(layer));
    let entries = archive
        .entries()
        .map_err(|e| Error::decode(format!("reading tar stream: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::decode(format!("reading tar entry: {}", e)))?;
        let relative = {
            let path = entry
                .path()
                .map_err(|e| Error::decode(format!("reading entry path: {}", e)))?;
            sanitize_entry_path(&path)?
        };
        let target = dest.join(&relative);
        let header = entry.header();
        let entry_type = header.entry_type();
        let mode = header.mode().ok();

        if entry_type.is_dir() {
            let mode = mode.unwrap_or(IMPLICIT_DIR_MODE);
            create_dir(&target, mode)
                .and_then(|_| set_mode(&target, mode))
                .with_context(|| format!("creating directory {}", relative.display()))?;
        } else if entry_type.is_file() {
            if relative.as_os_str().is_empty() {
                return Err(Error::decode("regular file entry with an empty path"));
            }
            write_file(&mut entry, &target, mode)
                .with_context(|| format!("writing file {}", relative.display()))?;
        } else {
            debug!(path = %relative.display(), entry_type = ?entry_type, "Skipping unsupported tar entry");
        }
    }
    Ok(())
}

/// Resolve an entry path relative to the output root.
///
/// Absolute paths and paths climbing out of the root are rejected.
fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::decode(format!(
                    "entry path {} escapes the output directory",
                    path.display()
                )));
            }
        }
    }
    Ok(relative)
}

fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode & 0o7777);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}

/// Apply a header mode to a path that may predate this layer
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

fn write_file<R: Read>(entry: &mut Entry<'_, R>, target: &Path, mode: Option<u32>) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        create_dir(parent, IMPLICIT_DIR_MODE)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if let Some(mode) = mode {
            options.mode(mode & 0o7777);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file: File = options.open(target)?;
    io::copy(entry, &mut file)?;
    drop(file);

    if let Some(mode) = mode {
        set_mode(target, mode)?;
    }
    Ok(())
}
