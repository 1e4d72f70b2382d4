//! # Dependency Resolution
//!
//! Turns a package root into a fully materialized dependency graph and keeps its lock file
//! honest.
//!
//! Resolution proceeds breadth first: all dependencies at one depth are fetched
//! concurrently, then the manifests of the fetched trees contribute the next depth. Within
//! a round the first failure aborts every fetch still in flight and is returned as is; no
//! partial graph ever reaches the compiler and the lock file is left untouched.
//!
//! ## Sum-check
//!
//! With the sum-check enabled (the default) every non-local dependency whose declaration
//! is still satisfied by its lock entry must hash to the recorded sum. A tag that moved
//! upstream therefore surfaces as [`Error::ChecksumMismatch`]. Local dependencies are
//! trees the developer edits, so their sums are refreshed rather than enforced.
//!
//! With the sum-check disabled the lock file is neither read nor written.


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::RegistryConfig;
use path_clean::PathClean;
use tokio::task::JoinSet;

use crate::checksum::{self, Sum};
use crate::lock::{DepMap, LockEntry, Pinned};
use crate::log::LogWriter;
use crate::manifest::{Dependency, GitRef, SourceKind, TarLocation};
use crate::source::{Fetched, Fetcher};
use crate::{Error, Lockfile, MANIFEST_NAME, Manifest, Name, vendor};

//================================================================================================
// Types
//================================================================================================

/// Resolves the dependency graph of a package.
#[derive(Debug, Clone)]
pub struct Resolver {
    fetcher: Fetcher,
    log: LogWriter,
    vendor: bool,
    sum_check: bool,
}

/// One dependency of a resolved graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDep {
    /// The dependency name.
    pub name: Name,
    /// The directory the compiler should see it at.
    pub path: PathBuf,
    /// The checksum of that directory.
    pub sum: Sum,
    /// The version its own manifest reports, or the tag it was requested by.
    pub version: Option<String>,
    /// The pinned locator; absent only for unverified vendor copies.
    pub pinned: Option<Pinned>,
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The absolute package root.
    pub root: PathBuf,
    /// The package's manifest.
    pub manifest: Manifest,
    /// Every direct and transitive dependency.
    pub deps: BTreeMap<Name, ResolvedDep>,
    /// The lock file describing the graph; absent when the sum-check is disabled.
    pub lock: Option<Lockfile>,
    /// Whether the lock file on disk was (re)written.
    pub lock_written: bool,
}

/// A declaration waiting to be resolved, with the root of the package declaring it.
#[derive(Debug, Clone)]
struct Pending {
    name: Name,
    dep: Dependency,
    base: PathBuf,
}

//================================================================================================
// Impls
//================================================================================================

impl Resolver {
    /// A resolver fetching through `fetcher`, with the sum-check enabled and vendoring off.
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            log: LogWriter::default(),
            vendor: false,
            sum_check: true,
        }
    }

    /// Rebuild `vendor/` after resolving and hand out vendored paths.
    pub fn vendor(mut self, vendor: bool) -> Self {
        self.vendor = vendor;
        self
    }

    /// Enable or disable the sum-check.
    pub fn sum_check(mut self, sum_check: bool) -> Self {
        self.sum_check = sum_check;
        self
    }

    /// Where user facing progress messages go.
    pub fn log(mut self, log: LogWriter) -> Self {
        self.log = log;
        self
    }

    /// Resolve the package rooted at `root`.
    pub async fn resolve(&self, root: &Path) -> crate::Result<Resolution> {
        let root = root.canonicalize().map_err(|_| Error::ManifestNotFound {
            root: root.to_path_buf(),
        })?;
        let manifest = Manifest::load(&root, self.fetcher.registry())?;
        let locked = if self.sum_check {
            Lockfile::load(&root)?
        } else {
            None
        };
        let status = Lockfile::status(locked.as_ref(), &manifest);
        tracing::debug!(root = %root.display(), ?status, sum_check = self.sum_check, "resolving package");

        let mut declared: BTreeMap<Name, String> = BTreeMap::new();
        let mut deps = BTreeMap::new();
        let mut round: Vec<_> = manifest
            .dependencies
            .iter()
            .map(|(name, dep)| Pending {
                name: name.clone(),
                dep: dep.clone(),
                base: root.clone(),
            })
            .collect();

        while !round.is_empty() {
            let mut pending = Vec::with_capacity(round.len());
            for p in round {
                let key = locator(&p.dep, &p.base);
                match declared.get(&p.name) {
                    Some(seen) if *seen == key => {},
                    Some(seen) => {
                        return Err(Error::invalid(
                            p.base.join(MANIFEST_NAME.as_str()),
                            format!("dependency '{}' is declared as both {seen} and {key}", p.name),
                        ));
                    },
                    None => {
                        declared.insert(p.name.clone(), key);
                        pending.push(p);
                    },
                }
            }

            let resolved = self.round(&root, pending, locked.as_ref()).await?;

            round = Vec::new();
            for (dep, transitive) in resolved {
                round.extend(transitive);
                deps.insert(dep.name.clone(), dep);
            }
        }

        if self.vendor {
            let vendored = vendor::vendor(&root, deps.values().map(|d| (&d.name, d.path.as_path())))?;
            for (name, path) in vendored {
                if let Some(dep) = deps.get_mut(&name) {
                    dep.path = path;
                }
            }
        }

        let mut lock_written = false;
        let lock = self.sum_check.then(|| lockfile(&root, &manifest, &deps));
        if let Some(lock) = &lock
            && locked.as_ref().is_none_or(|old| !old.same_graph(lock))
        {
            lock.write_atomic(&root)?;
            lock_written = true;
            tracing::info!(root = %root.display(), deps = lock.dependencies.len(), "updated lock file");
        }

        Ok(Resolution {
            root,
            manifest,
            deps,
            lock,
            lock_written,
        })
    }

    /// Resolve one depth of the graph, returning each dependency with the declarations of
    /// its own manifest.
    async fn round(
        &self,
        root: &Path,
        pending: Vec<Pending>,
        locked: Option<&Lockfile>,
    ) -> crate::Result<Vec<(ResolvedDep, Vec<Pending>)>> {
        let mut out = Vec::with_capacity(pending.len());
        let mut set = JoinSet::new();

        for p in pending {
            let entry = locked
                .and_then(|l| l.dependencies.get(&p.name))
                .filter(|e| p.dep.is_satisfied_by(&e.source))
                .cloned();

            if let Some(dep) = self.from_vendor(root, &p, entry.as_ref()).await? {
                out.push(dep);
                continue;
            }

            if p.dep.kind() != SourceKind::Local {
                self.log
                    .line(format_args!("downloading '{}' from '{}'", p.name, p.dep));
            }
            let fetcher = self.fetcher.clone();
            let sum_check = self.sum_check;
            set.spawn(async move {
                let fetched = fetcher.fetch(&p.name, &p.dep, &p.base).await?;
                let sum = settle(&p, &fetched, entry.as_ref(), sum_check).await?;
                Ok::<_, Error>((p, fetched, sum))
            });
        }

        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(|e| Error::io(root)(std::io::Error::other(e)))?;
            match result {
                Ok((p, fetched, sum)) => out.push(finish(
                    self.fetcher.registry(),
                    p,
                    fetched.dir,
                    sum,
                    Some(fetched.pinned),
                )?),
                Err(e) => {
                    set.abort_all();
                    tracing::error!(error = %e, "dependency resolution failed, cancelling remaining fetches");
                    return Err(e);
                },
            }
        }
        Ok(out)
    }

    /// Serve a dependency from `vendor/<name>` when allowed.
    ///
    /// Local dependencies are only taken from the vendor directory when their source is
    /// gone, as it is for a vendored package unpacked on another machine.
    async fn from_vendor(
        &self,
        root: &Path,
        p: &Pending,
        entry: Option<&LockEntry>,
    ) -> crate::Result<Option<(ResolvedDep, Vec<Pending>)>> {
        let dir = vendor::dir(root).join(&p.name);
        if !self.vendor || !dir.is_dir() {
            return Ok(None);
        }

        let (sum, pinned) = match (&p.dep, self.sum_check, entry) {
            (Dependency::Local(local), ..) => {
                if p.base.join(&local.path).is_dir() {
                    return Ok(None);
                }
                let sum = sum_of(&dir).await?;
                (sum, Some(Pinned::Local { local: local.path.clone() }))
            },
            (_, true, Some(entry)) => {
                let (name, path, expected) = (p.name.clone(), dir.clone(), entry.sum);
                let sum = blocking(&dir, move || checksum::verify(&name, &path, &expected)).await?;
                (sum, Some(entry.source.clone()))
            },
            // nothing to verify against; fetch afresh so a lock entry can be recorded
            (_, true, None) => return Ok(None),
            (_, false, _) => (sum_of(&dir).await?, None),
        };
        tracing::debug!(dep.name = %p.name, dir = %dir.display(), "using vendored dependency");
        finish(self.fetcher.registry(), p.clone(), dir, sum, pinned).map(Some)
    }
}

impl Resolution {
    /// `(name, path)` pairs for every dependency, as handed to the compiler.
    pub fn externals(&self) -> impl Iterator<Item = (&Name, &Path)> {
        self.deps.values().map(|d| (&d.name, d.path.as_path()))
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Hash a fetched tree and hold it against the lock entry it must match.
async fn settle(
    p: &Pending,
    fetched: &Fetched,
    entry: Option<&LockEntry>,
    sum_check: bool,
) -> crate::Result<Sum> {
    let name = p.name.clone();
    let dir = fetched.dir.clone();
    match entry {
        Some(entry) if sum_check && p.dep.kind() != SourceKind::Local => {
            let expected = entry.sum;
            blocking(&fetched.dir, move || checksum::verify(&name, &dir, &expected)).await
        },
        _ => sum_of(&fetched.dir).await,
    }
}

async fn sum_of(dir: &Path) -> crate::Result<Sum> {
    let path = dir.to_path_buf();
    blocking(dir, move || Sum::of_dir(&path).map_err(Error::io(&path))).await
}

/// Complete a resolved dependency by reading the declarations of its own manifest.
fn finish(
    registry: &RegistryConfig,
    p: Pending,
    dir: PathBuf,
    sum: Sum,
    pinned: Option<Pinned>,
) -> crate::Result<(ResolvedDep, Vec<Pending>)> {
    let manifest = match Manifest::load(&dir, registry) {
        Ok(manifest) => Some(manifest),
        Err(Error::ManifestNotFound { .. }) => None,
        Err(e) => return Err(e),
    };

    let version = manifest
        .as_ref()
        .and_then(|m| m.package.version.clone())
        .or_else(|| requested_tag(&p.dep));
    let transitive = manifest
        .map(|m| {
            m.dependencies
                .into_iter()
                .map(|(name, dep)| Pending {
                    name,
                    dep,
                    base: dir.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok((
        ResolvedDep {
            name: p.name,
            path: dir,
            sum,
            version,
            pinned,
        },
        transitive,
    ))
}

fn requested_tag(dep: &Dependency) -> Option<String> {
    match dep {
        Dependency::Git(git) => match &git.reference {
            GitRef::Tag(tag) => Some(tag.clone()),
            GitRef::Commit(_) => None,
        },
        Dependency::Oci(oci) => oci.reference.tag.clone(),
        Dependency::Local(_) | Dependency::Tar(_) => None,
    }
}

/// A comparable identity for a declaration, with relative paths made absolute.
fn locator(dep: &Dependency, base: &Path) -> String {
    match dep {
        Dependency::Local(local) => base.join(&local.path).clean().display().to_string(),
        Dependency::Tar(tar) => match &tar.location {
            TarLocation::Path(path) => base.join(path).clean().display().to_string(),
            TarLocation::Url(url) => url.to_string(),
        },
        dep => dep.to_string(),
    }
}

fn lockfile(root: &Path, manifest: &Manifest, deps: &BTreeMap<Name, ResolvedDep>) -> Lockfile {
    let entries: DepMap = deps
        .values()
        .filter_map(|dep| {
            Some(LockEntry {
                name: dep.name.clone(),
                version: dep.version.clone(),
                sum: dep.sum,
                path: pathdiff::diff_paths(&dep.path, root).unwrap_or_else(|| dep.path.clone()),
                source: dep.pinned.clone()?,
            })
        })
        .collect();
    Lockfile::new(manifest, entries)
}

async fn blocking<T, F>(path: &Path, f: F) -> crate::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::io(path)(std::io::Error::other(e)))?
}
