//! # Fetch Cache
//!
//! A content cache shared by all fetchers. It is an explicit value rather than a global so
//! that tests and embedders can point it anywhere; [`FetchCache::from_config`] gives the
//! conventional location.
//!
//! ```text
//! <root>/git/db/<key>                 bare repository per remote url
//! <root>/git/checkouts/<key>/<commit> materialized commit trees
//! <root>/oci/<key>/<digest>           extracted registry artifacts
//! <root>/tar/<key>                    extracted archives
//! ```
//!
//! Keys are the base32 blake3 digest of the locator, so any url maps to a flat, filesystem
//! safe name. Immutable entries (commits, digests) are reused as-is once present; a
//! directory only ever appears at its final location through a rename, so a present entry
//! is always complete.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{BASE32, MANIFEST_NAME};

//================================================================================================
// Types
//================================================================================================

/// The on-disk cache of fetched dependency trees.
#[derive(Debug)]
pub struct FetchCache {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

//================================================================================================
// Impls
//================================================================================================

impl FetchCache {
    /// A cache rooted at `root`. Nothing is created until something is fetched.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The cache at the configured `cache.root`.
    pub fn from_config() -> Self {
        Self::new(config::CONFIG.cache.root.clone())
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn git_db(&self, url: &str) -> PathBuf {
        self.root.join("git/db").join(key(url))
    }

    pub(crate) fn git_checkout(&self, url: &str, commit: &str) -> PathBuf {
        self.root.join("git/checkouts").join(key(url)).join(commit)
    }

    pub(crate) fn oci_dir(&self, location: &str, digest: &str) -> PathBuf {
        let digest = digest.split_once(':').map_or(digest, |(_, hex)| hex);
        self.root.join("oci").join(key(location)).join(digest)
    }

    pub(crate) fn tar_dir(&self, location: &str) -> PathBuf {
        self.root.join("tar").join(key(location))
    }

    /// Serialize work on one cache entry within this process.
    pub(crate) async fn lock(&self, entry: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(entry.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Populate `dest` through `fill`, which writes into a temporary sibling directory that
    /// is renamed over `dest` once complete.
    pub(crate) fn materialize<E>(
        dest: &Path,
        fill: impl FnOnce(&Path) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<io::Error>,
    {
        let parent = dest.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new().prefix(".tmp").tempdir_in(parent)?;
        fill(staging.path())?;

        if dest.exists() {
            fs::remove_dir_all(dest)?;
        }
        let staged = staging.keep();
        fs::rename(&staged, dest)?;
        tracing::debug!(dest = %dest.display(), "materialized cache entry");
        Ok(())
    }
}

//================================================================================================
// Functions
//================================================================================================

fn key(locator: &str) -> String {
    let hash = blake3::hash(locator.as_bytes());
    base32::encode(BASE32, &hash.as_bytes()[..20])
}

/// The package root inside an extracted tree.
///
/// Archives commonly wrap the package in a single top-level directory; when the tree has
/// no manifest of its own but exactly one directory that does, that directory is the root.
pub(crate) fn package_root(dir: &Path) -> PathBuf {
    if dir.join(MANIFEST_NAME.as_str()).exists() {
        return dir.to_path_buf();
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return dir.to_path_buf();
    };
    let entries: Vec<_> = entries.filter_map(Result::ok).collect();
    match entries.as_slice() {
        [only] if only.path().join(MANIFEST_NAME.as_str()).exists() => only.path(),
        _ => dir.to_path_buf(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_are_stable_and_distinct() {
        let cache = FetchCache::new("/cache");
        let a = cache.git_db("https://example.com/a.git");
        assert_eq!(a, cache.git_db("https://example.com/a.git"));
        assert_ne!(a, cache.git_db("https://example.com/b.git"));
        assert_eq!(
            cache.oci_dir("ghcr.io/kcl-lang/k8s", "sha256:abcd"),
            cache.oci_dir("ghcr.io/kcl-lang/k8s", "abcd")
        );
        assert!(a.starts_with("/cache/git/db"));
    }

    #[test]
    fn materialize_replaces_atomically() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("entry");
        FetchCache::materialize::<io::Error>(&dest, |tmp| fs::write(tmp.join("a"), "1"))?;
        FetchCache::materialize::<io::Error>(&dest, |tmp| fs::write(tmp.join("b"), "2"))?;
        assert!(!dest.join("a").exists());
        assert_eq!(fs::read_to_string(dest.join("b"))?, "2");

        let failed = FetchCache::materialize::<io::Error>(&dest, |_| {
            Err(io::Error::other("interrupted"))
        });
        assert!(failed.is_err());
        assert!(dest.join("b").exists());
        Ok(())
    }

    #[test]
    fn single_wrapped_package_is_unwrapped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("k8s-1.0"))?;
        fs::write(dir.path().join("k8s-1.0/kcl.mod"), "")?;
        assert_eq!(package_root(dir.path()), dir.path().join("k8s-1.0"));

        fs::write(dir.path().join("kcl.mod"), "")?;
        assert_eq!(package_root(dir.path()), dir.path());
        Ok(())
    }
}
