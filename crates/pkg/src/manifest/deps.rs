//! # Dependency Declarations
//!
//! A declaration in `[dependencies]` names exactly one source. The on-disk form is loose
//! (a bare version string or an inline table of optional keys); [`Dependency`] is the
//! validated, closed sum the rest of the crate dispatches on.
//!
//! | Form                                   | Source                             |
//! |----------------------------------------|------------------------------------|
//! | `k8s = "1.28"`                         | OCI, default registry, tag `1.28`  |
//! | `{ version = "1.28" }`                 | same as above                      |
//! | `{ path = "../helper" }`               | local directory                    |
//! | `{ git = "<url>", tag = "v1" }`        | git, tag re-resolved on every run  |
//! | `{ git = "<url>", commit = "<sha>" }`  | git, pinned                        |
//! | `{ oci = "oci://host/repo", tag = "1" }` | OCI registry                     |
//! | `{ tar = "./lib.tar" }`                | local or `http(s)` tar archive     |

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use bstr::ByteSlice;
use config::RegistryConfig;
use lazy_regex::{Lazy, Regex};
use serde::Deserialize;

use super::SourceKind;
use crate::Name;
use crate::lock::Pinned;
use crate::uri::OciReference;

static COMMIT_REGEX: Lazy<Regex> = lazy_regex::lazy_regex!(r"^[0-9a-f]{7,64}$");

const KEYS: &[&str] = &["path", "git", "commit", "tag", "oci", "tar", "version"];

//================================================================================================
// Types
//================================================================================================

/// A validated dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// A directory on disk.
    Local(LocalDep),
    /// A git repository.
    Git(GitDep),
    /// An OCI artifact.
    Oci(OciDep),
    /// A tar archive.
    Tar(TarDep),
}

/// A dependency on a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDep {
    /// The path as written, relative to the declaring package unless absolute.
    pub path: PathBuf,
}

/// A dependency on a git repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitDep {
    /// The repository URL, in any form git understands.
    pub url: String,
    /// What to check out.
    pub reference: GitRef,
}

/// The revision of a [`GitDep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    /// A full or abbreviated commit hash.
    Commit(String),
    /// A tag, which may move upstream.
    Tag(String),
}

/// A dependency on an OCI artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciDep {
    /// The artifact reference; always carries a tag or digest.
    pub reference: OciReference,
}

/// A dependency on a tar archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarDep {
    /// Where the archive lives.
    pub location: TarLocation,
}

/// The location of a [`TarDep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TarLocation {
    /// A file path, relative to the declaring package unless absolute.
    Path(PathBuf),
    /// An `http(s)` URL.
    Url(url::Url),
}

/// The loose on-disk form of a declaration.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub(crate) enum RawDependency {
    Version(String),
    Table(BTreeMap<String, String>),
}

//================================================================================================
// Impls
//================================================================================================

impl RawDependency {
    pub(crate) fn validate(
        self,
        name: &Name,
        registry: &RegistryConfig,
    ) -> Result<Dependency, String> {
        let mut table = match self {
            RawDependency::Version(version) => {
                return Ok(Dependency::registry(name, &version, registry));
            },
            RawDependency::Table(table) => table,
        };

        if let Some(key) = table.keys().find(|k| !KEYS.contains(&k.as_str())) {
            return Err(format!("unknown key '{key}'"));
        }

        let sources: Vec<&str> = ["path", "git", "oci", "tar"]
            .into_iter()
            .filter(|k| table.contains_key(*k))
            .collect();
        if sources.len() > 1 {
            return Err(format!(
                "exactly one source is allowed, found {}",
                sources.join(", ")
            ));
        }

        let commit = table.remove("commit");
        let tag = table.remove("tag");
        let version = table.remove("version");
        if commit.is_some() && !table.contains_key("git") {
            return Err("'commit' is only valid for git dependencies".into());
        }
        if tag.is_some() && !(table.contains_key("git") || table.contains_key("oci")) {
            return Err("'tag' is only valid for git and oci dependencies".into());
        }

        if let Some(path) = table.remove("path") {
            Ok(Dependency::Local(LocalDep { path: path.into() }))
        } else if let Some(url) = table.remove("git") {
            gix::url::parse(url.as_bytes().as_bstr()).map_err(|e| e.to_string())?;
            let reference = match (commit, tag) {
                (Some(commit), None) if COMMIT_REGEX.is_match(&commit) => GitRef::Commit(commit),
                (Some(commit), None) => return Err(format!("'{commit}' is not a commit hash")),
                (None, Some(tag)) => GitRef::Tag(tag),
                _ => return Err("git dependencies need exactly one of 'commit' or 'tag'".into()),
            };
            Ok(Dependency::Git(GitDep { url, reference }))
        } else if let Some(oci) = table.remove("oci") {
            let reference = oci
                .parse::<OciReference>()
                .and_then(|r| r.with_tag(tag).pinned())
                .map_err(|e| e.to_string())?;
            Ok(Dependency::Oci(OciDep { reference }))
        } else if let Some(tar) = table.remove("tar") {
            Ok(Dependency::Tar(TarDep {
                location: TarLocation::parse(&tar).map_err(|e| e.to_string())?,
            }))
        } else if let Some(version) = version {
            Ok(Dependency::registry(name, &version, registry))
        } else {
            Err("no source given".into())
        }
    }
}

impl Dependency {
    fn registry(name: &Name, version: &str, registry: &RegistryConfig) -> Self {
        Dependency::Oci(OciDep {
            reference: OciReference::in_registry(&registry.host, &registry.repo, name, version),
        })
    }

    /// Which fetcher handles this declaration.
    pub fn kind(&self) -> SourceKind {
        match self {
            Dependency::Local(_) => SourceKind::Local,
            Dependency::Git(_) => SourceKind::Git,
            Dependency::Oci(_) => SourceKind::Oci,
            Dependency::Tar(_) => SourceKind::Tar,
        }
    }

    /// Whether a previously pinned locator still satisfies this declaration.
    ///
    /// A declaration edited since the lock file was written no longer matches its old
    /// entry, which forces a fresh fetch.
    pub fn is_satisfied_by(&self, pinned: &Pinned) -> bool {
        match (self, pinned) {
            (Dependency::Local(dep), Pinned::Local { local }) => &dep.path == local,
            (Dependency::Git(dep), Pinned::Git { url, commit, tag }) => {
                &dep.url == url
                    && match &dep.reference {
                        GitRef::Commit(c) => commit.starts_with(c.as_str()),
                        GitRef::Tag(t) => tag.as_ref() == Some(t),
                    }
            },
            (
                Dependency::Oci(OciDep { reference }),
                Pinned::Oci {
                    registry,
                    repository,
                    digest,
                    tag,
                },
            ) => {
                &reference.registry == registry
                    && &reference.repository == repository
                    && match (&reference.digest, &reference.tag) {
                        (Some(d), _) => d == digest,
                        (None, t) => t == tag,
                    }
            },
            (Dependency::Tar(dep), Pinned::Tar { tar }) => &dep.location.to_string() == tar,
            _ => false,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Local(dep) => write!(f, "{}", dep.path.display()),
            Dependency::Git(GitDep { url, reference }) => match reference {
                GitRef::Commit(c) => write!(f, "{url}#{c}"),
                GitRef::Tag(t) => write!(f, "{url}@{t}"),
            },
            Dependency::Oci(dep) => write!(f, "{}", dep.reference),
            Dependency::Tar(dep) => write!(f, "{}", dep.location),
        }
    }
}

impl TarLocation {
    fn parse(s: &str) -> Result<Self, url::ParseError> {
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(TarLocation::Url(url::Url::parse(s)?))
        } else {
            Ok(TarLocation::Path(s.into()))
        }
    }
}

impl fmt::Display for TarLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TarLocation::Path(p) => write!(f, "{}", p.display()),
            TarLocation::Url(u) => write!(f, "{u}"),
        }
    }
}
