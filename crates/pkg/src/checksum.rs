//! # Sum-check
//!
//! Content checksums for materialized dependency trees.
//!
//! A [`Sum`] is a BLAKE3 digest over every file below a directory. Files are keyed by their
//! `/`-separated path relative to the root and hashed in sorted order, so the same logical
//! content always hashes identically regardless of the order the filesystem yields it, the
//! platform's path separator, or where the tree lives on disk. `.git` directories are
//! skipped since their layout differs between clones of identical content.
//!
//! Each file contributes a framed record (`F\0<path>\0<len><bytes>`; symlinks contribute
//! `L\0<path>\0<target>`), which keeps `a/bc` + `d` from colliding with `a/b` + `cd`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Name};

const GIT_DIR: &str = ".git";

/// A content checksum, printed as unpadded base32.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sum(#[serde(with = "serde_base32")] [u8; 32]);

/// A `Sum` string that does not decode to 32 bytes.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid checksum: {0}")]
pub struct InvalidSum(String);

enum Record {
    File(PathBuf),
    Link(PathBuf),
}

impl Sum {
    /// Hash a byte string.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Sum(*blake3::hash(bytes).as_bytes())
    }

    /// Hash the tree rooted at `dir`.
    pub fn of_dir(dir: &Path) -> std::io::Result<Self> {
        let mut records = Vec::new();
        collect(dir, dir, &mut records)?;
        records.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut hasher = blake3::Hasher::new();
        for (rel, record) in records {
            match record {
                Record::File(path) => {
                    let contents = fs::read(&path)?;
                    hasher.update(b"F\0");
                    hasher.update(rel.as_bytes());
                    hasher.update(b"\0");
                    hasher.update(&(contents.len() as u64).to_le_bytes());
                    hasher.update(&contents);
                },
                Record::Link(path) => {
                    let target = fs::read_link(&path)?;
                    hasher.update(b"L\0");
                    hasher.update(rel.as_bytes());
                    hasher.update(b"\0");
                    hasher.update(normalize(&target).as_bytes());
                },
            }
        }
        Ok(Sum(*hasher.finalize().as_bytes()))
    }
}

impl fmt::Display for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base32::encode(crate::BASE32, &self.0))
    }
}

impl fmt::Debug for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sum({self})")
    }
}

impl FromStr for Sum {
    type Err = InvalidSum;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        base32::decode(crate::BASE32, s)
            .and_then(|bytes| bytes.try_into().ok())
            .map(Sum)
            .ok_or_else(|| InvalidSum(s.to_owned()))
    }
}

/// Check that the tree at `dir` hashes to `expected`, returning the computed sum.
///
/// # Errors
///
/// [`Error::ChecksumMismatch`] when the content differs, [`Error::Io`] when the tree cannot
/// be read.
pub fn verify(name: &Name, dir: &Path, expected: &Sum) -> crate::Result<Sum> {
    let found = Sum::of_dir(dir).map_err(Error::io(dir))?;
    if &found != expected {
        tracing::error!(
            dep.name = %name,
            %expected,
            %found,
            path = %dir.display(),
            "dependency content does not match the lock file"
        );
        return Err(Error::ChecksumMismatch {
            name: name.clone(),
            path: dir.to_path_buf(),
            expected: *expected,
            found,
        });
    }
    Ok(found)
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Record)>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if entry.file_name() == GIT_DIR {
                continue;
            }
            collect(root, &path, out)?;
            continue;
        }

        let rel = path.strip_prefix(root).map(normalize).unwrap_or_default();
        if file_type.is_symlink() {
            out.push((rel, Record::Link(path)));
        } else {
            out.push((rel, Record::File(path)));
        }
    }
    Ok(())
}

fn normalize(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

mod serde_base32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = base32::encode(crate::BASE32, hash);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base32::decode(crate::BASE32, &s)
            .ok_or_else(|| serde::de::Error::custom("invalid base32 string"))
            .and_then(|bytes| {
                bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes for a BLAKE3 sum"))
            })
    }
}
