//! # Package Archives
//!
//! Packing a package root into a tar archive and unpacking archives back into directories.
//!
//! Unpacking is idempotent: an archive `<dir>/<stem>.tar` (or `.tar.gz`/`.tgz`) always
//! unpacks into `<dir>/<stem>`, replacing whatever an earlier unpack left there. The tree
//! is extracted into a temporary sibling first and swapped in afterwards, so a failed
//! extraction never leaves a half-populated destination behind.
//!
//! Entries with absolute paths or `..` components are rejected before anything is written.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::NamedTempFile;

use crate::VENDOR_DIR;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar"];

/// Errors raised while packing or unpacking archives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying filesystem operation failed.
    #[error("archive i/o error at '{}': {source}", .path.display())]
    Io {
        /// The archive or directory involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// An entry would be written outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending entry path.
        path: String,
    },
    /// The file name does not look like a tar archive.
    #[error("'{}' is not a tar archive", .0.display())]
    NotAnArchive(PathBuf),
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Whether `path` names a tar archive this module can unpack.
pub fn is_archive(path: &Path) -> bool {
    stem(path).is_some()
}

/// The directory [`unpack`] extracts `archive` into.
pub fn destination(archive: &Path) -> Result<PathBuf> {
    let stem = stem(archive).ok_or_else(|| Error::NotAnArchive(archive.to_path_buf()))?;
    let parent = archive.parent().unwrap_or(Path::new("."));
    Ok(parent.join(stem))
}

/// Extract `archive` next to itself and return the extracted directory.
pub fn unpack(archive: &Path) -> Result<PathBuf> {
    let dest = destination(archive)?;
    let parent = dest.parent().unwrap_or(Path::new("."));
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{name}"))
        .tempdir_in(parent)
        .map_err(io(parent))?;
    extract(archive, staging.path())?;

    if dest.exists() {
        tracing::debug!(dest = %dest.display(), "replacing previously unpacked archive");
        fs::remove_dir_all(&dest).map_err(io(&dest))?;
    }
    let staged = staging.keep();
    fs::rename(&staged, &dest).map_err(io(&dest))?;

    tracing::info!(archive = %archive.display(), dest = %dest.display(), "unpacked package archive");
    Ok(dest)
}

/// Extract `archive` (plain or gzip compressed tar) into the existing directory `dest`.
pub fn extract(archive: &Path, dest: &Path) -> Result<usize> {
    let mut file = BufReader::new(File::open(archive).map_err(io(archive))?);
    let mut magic = [0u8; 2];
    let gzipped = {
        let buf = std::io::BufRead::fill_buf(&mut file).map_err(io(archive))?;
        if buf.len() >= 2 {
            magic.copy_from_slice(&buf[..2]);
        }
        magic == GZIP_MAGIC
    };
    let extracted = if gzipped {
        extract_reader(GzDecoder::new(file), dest)
    } else {
        extract_reader(file, dest)
    };
    extracted.map_err(|e| match e {
        Error::Io { source, .. } => Error::Io {
            path: archive.to_path_buf(),
            source,
        },
        e => e,
    })
}

/// Extract a tar stream into `dest`, returning the number of entries written.
pub fn extract_reader<R: Read>(reader: R, dest: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let mut count = 0;

    for entry in archive.entries().map_err(io(dest))? {
        let mut entry = entry.map_err(io(dest))?;
        let entry_path = entry.path().map_err(io(dest))?.into_owned();

        validate_entry_path(&entry_path)?;

        entry.unpack_in(dest).map_err(io(dest))?;
        count += 1;
    }
    Ok(count)
}

/// Extract an in-memory archive (plain or gzip compressed tar) into `dest`.
pub fn extract_bytes(bytes: &[u8], dest: &Path) -> Result<usize> {
    if bytes.starts_with(&GZIP_MAGIC) {
        extract_reader(GzDecoder::new(bytes), dest)
    } else {
        extract_reader(bytes, dest)
    }
}

/// Pack the package rooted at `root` into the archive `dest`.
///
/// Version control metadata is never included. The vendor directory is included only when
/// `vendor` is set, which makes the archive self-contained; without it consumers must
/// resolve dependencies again. Entries are sorted and written with deterministic headers,
/// so packing an unchanged tree twice yields identical bytes.
pub fn pack(root: &Path, dest: &Path, vendor: bool) -> Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let root = root.canonicalize().map_err(io(root))?;
    // the archive may be written into the tree it packs
    let own = Output {
        dir: parent.canonicalize().map_err(io(parent))?,
        name: name.clone(),
    };

    let mut files = Vec::new();
    collect(&root, &root, vendor, &own, &mut files).map_err(io(&root))?;
    files.sort();

    let tmp = NamedTempFile::with_prefix_in(format!(".{name}"), parent).map_err(io(parent))?;
    let mut builder = tar::Builder::new(tmp.as_file());
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);
    for rel in &files {
        let full = root.join(rel);
        if full.symlink_metadata().map_err(io(&full))?.is_dir() {
            builder.append_dir(rel, &full).map_err(io(&full))?;
        } else {
            builder
                .append_path_with_name(&full, rel)
                .map_err(io(&full))?;
        }
    }
    builder.finish().map_err(io(dest))?;
    drop(builder);

    tmp.persist(dest).map_err(|e| Error::Io {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    tracing::info!(root = %root.display(), archive = %dest.display(), vendor, "packed package");
    Ok(())
}

/// The archive being written and its temporary siblings.
struct Output {
    dir: PathBuf,
    name: String,
}

impl Output {
    fn contains(&self, dir: &Path, entry: &str) -> bool {
        dir == self.dir
            && (entry == self.name
                || entry
                    .strip_prefix('.')
                    .is_some_and(|e| e.starts_with(&self.name)))
    }
}

fn collect(
    root: &Path,
    dir: &Path,
    vendor: bool,
    own: &Output,
    out: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name == ".git" || own.contains(dir, &name.to_string_lossy()) {
            continue;
        }
        if dir == root && name == VENDOR_DIR && !vendor {
            continue;
        }
        let rel = path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_default();
        let is_dir = entry.file_type()?.is_dir();
        out.push(rel);
        if is_dir {
            collect(root, &path, vendor, own, out)?;
        }
    }
    Ok(())
}

fn stem(archive: &Path) -> Option<String> {
    let name = archive.file_name()?.to_str()?;
    SUFFIXES
        .iter()
        .find_map(|s| name.strip_suffix(s))
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

fn validate_entry_path(path: &Path) -> Result<()> {
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(Error::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}
