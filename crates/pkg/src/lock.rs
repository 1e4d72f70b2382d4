//! # Lock File Format
//!
//! The lock file (`kcl.mod.lock`) is the persisted result of a successful resolution: one
//! entry per dependency (direct and transitive) carrying its pinned locator and the
//! checksum of its materialized tree, plus the checksum of the manifest it was resolved
//! from.
//!
//! ## Example Lock File
//!
//! ```toml
//! # @generated by kpm; do not edit
//! version = 1
//! manifest = "d6u4mm2b5klb7v1s3c3ivgkcegh4fgkrgmqm2um7c0ce7ocg3nn0"
//!
//! [[dependencies]]
//! name = "konfig"
//! version = "0.4.0"
//! sum = "3t2m0f1cmg8uqok5qhqosfk4p8lfpqr3i6grl1b1l3nq8mi3jkpg"
//! path = "/home/me/.cache/kpm/git/checkouts/.../e4f0949e..."
//! type = "git"
//! url = "https://github.com/kcl-lang/konfig.git"
//! commit = "e4f0949e04edfeb30a8e4c4df80def1e5012828f"
//! tag = "v0.4.0"
//! ```
//!
//! ## Writes
//!
//! The file is never edited in place. [`Lockfile::write_atomic`] writes a temporary file
//! next to the target and renames it over the old one, so readers observe either the old
//! or the new file. Writers for the same package root are serialized within the process.


use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tempfile::NamedTempFile;

use crate::checksum::Sum;
use crate::manifest::SourceKind;
use crate::{Error, LOCK_NAME, Manifest, Name};

const HEADER: &str = "# @generated by kpm; do not edit\n";

static WRITERS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

//================================================================================================
// Types
//================================================================================================

/// A dependency source resolved to an immutable identifier, serialized as a `type`-tagged
/// table.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pinned {
    /// A local directory, recorded as declared.
    Local {
        /// The declared path.
        local: PathBuf,
    },
    /// A git commit.
    Git {
        /// The repository URL.
        url: String,
        /// The full commit hash.
        commit: String,
        /// The tag the commit was resolved from, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    /// An OCI manifest digest.
    Oci {
        /// Registry host.
        registry: String,
        /// Repository path.
        repository: String,
        /// The manifest digest actually pulled.
        digest: String,
        /// The tag the digest was resolved from, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    /// A tar archive location.
    Tar {
        /// The archive path or URL, as declared.
        tar: String,
    },
}

/// The resolved, verifiable record of one dependency.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct LockEntry {
    /// The dependency name.
    pub name: Name,
    /// The version the dependency's own manifest reports, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// The checksum of the materialized tree.
    pub sum: Sum,
    /// Where the tree was materialized, relative to the package root when possible.
    pub path: PathBuf,
    /// The pinned locator.
    #[serde(flatten)]
    pub source: Pinned,
}

/// Lock entries keyed by name; serialized as a list in name order for minimal diffs.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct DepMap(BTreeMap<Name, LockEntry>);

/// The root structure of `kcl.mod.lock`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Lockfile {
    /// The version of the lock file schema.
    pub version: u8,
    /// The checksum of the manifest this file was resolved from.
    pub manifest: Sum,
    /// The locked dependencies.
    #[serde(default, skip_serializing_if = "DepMap::is_empty")]
    pub dependencies: DepMap,
}

/// How a lock file on disk relates to the current manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// There is no lock file.
    Missing,
    /// The manifest changed since the lock file was written.
    Stale,
    /// The lock file was resolved from this exact manifest.
    Valid,
}

//================================================================================================
// Impls
//================================================================================================

impl Pinned {
    /// The fetcher this locator belongs to.
    pub fn kind(&self) -> SourceKind {
        match self {
            Pinned::Local { .. } => SourceKind::Local,
            Pinned::Git { .. } => SourceKind::Git,
            Pinned::Oci { .. } => SourceKind::Oci,
            Pinned::Tar { .. } => SourceKind::Tar,
        }
    }
}

impl DepMap {
    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look an entry up by name.
    pub fn get(&self, name: &str) -> Option<&LockEntry> {
        self.0.get(name)
    }

    /// Iterate over entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &LockEntry> {
        self.0.values()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<LockEntry> for DepMap {
    fn from_iter<I: IntoIterator<Item = LockEntry>>(iter: I) -> Self {
        DepMap(iter.into_iter().map(|e| (e.name.clone(), e)).collect())
    }
}

impl Serialize for DepMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // BTreeMap iterates in sorted order automatically.
        let values: Vec<_> = self.0.values().collect();
        values.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DepMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<LockEntry> = Vec::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for entry in entries {
            if let Some(dup) = map.insert(entry.name.clone(), entry) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate lock entry for '{}'",
                    dup.name
                )));
            }
        }
        Ok(DepMap(map))
    }
}

impl Lockfile {
    /// Start a lock file for the given manifest.
    pub fn new(manifest: &Manifest, dependencies: DepMap) -> Self {
        Lockfile {
            version: 1,
            manifest: manifest.checksum(),
            dependencies,
        }
    }

    /// Load the lock file next to the manifest in `root`, if there is one.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] when the file exists but is not a valid lock file.
    pub fn load(root: &Path) -> crate::Result<Option<Self>> {
        let path = root.join(LOCK_NAME.as_str());
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path)(e)),
        };
        toml_edit::de::from_str(&content)
            .map(Some)
            .map_err(|source| Error::Parse { path, source })
    }

    /// Classify an optional lock file against the current manifest.
    pub fn status(lock: Option<&Lockfile>, manifest: &Manifest) -> LockStatus {
        match lock {
            None => LockStatus::Missing,
            Some(lock) if lock.manifest != manifest.checksum() => LockStatus::Stale,
            Some(_) => LockStatus::Valid,
        }
    }

    /// Whether two lock files record the same graph, materialized at the same paths.
    ///
    /// A path changes when a dependency moves between the cache and `vendor/`; the lock is
    /// rewritten then so it never points at a directory the last run did not use.
    pub fn same_graph(&self, other: &Lockfile) -> bool {
        self.version == other.version
            && self.manifest == other.manifest
            && self.dependencies.len() == other.dependencies.len()
            && self
                .dependencies
                .iter()
                .zip(other.dependencies.iter())
                .all(|(a, b)| {
                    a.name == b.name
                        && a.version == b.version
                        && a.sum == b.sum
                        && a.source == b.source
                        && a.path == b.path
                })
    }

    /// Render the file contents, including the generated header.
    pub fn render(&self) -> crate::Result<String> {
        Ok(format!("{HEADER}{}", toml_edit::ser::to_string_pretty(self)?))
    }

    /// Atomically replace the lock file in `root`.
    ///
    /// # Errors
    ///
    /// Fails if the temporary file cannot be created, written or renamed; the previous lock
    /// file is left untouched in that case.
    pub fn write_atomic(&self, root: &Path) -> crate::Result<()> {
        let rendered = self.render()?;
        let path = root.join(LOCK_NAME.as_str());

        let writer = {
            let mut writers = WRITERS.lock().unwrap_or_else(PoisonError::into_inner);
            let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            writers.entry(key).or_default().clone()
        };
        let _guard = writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tmp = NamedTempFile::with_prefix_in(format!(".{}", LOCK_NAME.as_str()), root)
            .map_err(Error::io(root))?;
        tmp.write_all(rendered.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(Error::io(tmp.path()))?;
        tmp.persist(&path).map_err(|e| Error::io(&path)(e.error))?;

        tracing::debug!(path = %path.display(), deps = self.dependencies.len(), "wrote lock file");
        Ok(())
    }
}
