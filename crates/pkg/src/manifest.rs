//! # Package Manifest
//!
//! This module provides the types for a package's `kcl.mod` manifest: its identity, its
//! dependency declarations and the default entries a run compiles.
//!
//! ## Example Manifest
//!
//! ```toml
//! [package]
//! name = "app"
//! edition = "v0.9.0"
//! version = "0.1.0"
//!
//! [dependencies]
//! k8s = "1.28"
//! helper = { path = "../helper" }
//! konfig = { git = "https://github.com/kcl-lang/konfig.git", tag = "v0.4.0" }
//! hello = { oci = "oci://ghcr.io/kcl-lang/helloworld", tag = "0.1.0" }
//! bundled = { tar = "./deps/bundled.tar" }
//!
//! [profile]
//! entries = ["main.k"]
//! ```
//!
//! ## Validation
//!
//! Loading a manifest distinguishes three failures: a missing file
//! ([`Error::ManifestNotFound`]), invalid TOML ([`Error::Parse`]) and declarations that
//! parse but make no sense, such as a dependency with two sources or two names that import
//! under the same identifier ([`Error::Validation`]).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use config::RegistryConfig;
use serde::{Deserialize, Serialize};

use crate::checksum::Sum;
use crate::{Error, MANIFEST_NAME, Name};

pub mod deps;

pub use self::deps::{Dependency, GitDep, GitRef, LocalDep, OciDep, TarDep, TarLocation};

//================================================================================================
// Types
//================================================================================================

/// The kind of source a dependency is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A directory on the local filesystem.
    Local,
    /// A git repository at a commit or tag.
    Git,
    /// An artifact in an OCI registry.
    Oci,
    /// A tar archive, local or remote.
    Tar,
}

/// The `[package]` table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// The package name.
    pub name: Name,
    /// The language edition the package targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    /// The package version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// A free form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The `[profile]` table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    /// Entry files compiled when a run names none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<PathBuf>,
}

/// A loaded and validated `kcl.mod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Package identity.
    pub package: Package,
    /// Declared dependencies, keyed by name.
    pub dependencies: BTreeMap<Name, Dependency>,
    /// Run defaults.
    pub profile: Profile,
    sum: Sum,
}

#[derive(Deserialize)]
struct RawManifest {
    package: Package,
    #[serde(default)]
    dependencies: BTreeMap<Name, deps::RawDependency>,
    #[serde(default)]
    profile: Profile,
}

//================================================================================================
// Impls
//================================================================================================

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Local => "local",
            SourceKind::Git => "git",
            SourceKind::Oci => "oci",
            SourceKind::Tar => "tar",
        })
    }
}

impl Manifest {
    /// Load the manifest of the package rooted at `root`.
    ///
    /// Version-only dependencies are expanded against `registry`.
    ///
    /// # Errors
    ///
    /// [`Error::ManifestNotFound`] when there is no manifest, [`Error::Parse`] for invalid
    /// TOML and [`Error::Validation`] for ill-formed declarations.
    pub fn load(root: &Path, registry: &RegistryConfig) -> crate::Result<Self> {
        let path = root.join(MANIFEST_NAME.as_str());
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ManifestNotFound {
                    root: root.to_path_buf(),
                });
            },
            Err(e) => return Err(Error::io(&path)(e)),
        };
        Manifest::parse(&content, &path, registry)
    }

    /// Parse manifest text; `path` is only used for error context.
    pub fn parse(content: &str, path: &Path, registry: &RegistryConfig) -> crate::Result<Self> {
        let raw: RawManifest =
            toml_edit::de::from_str(content).map_err(|source| Error::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut dependencies = BTreeMap::new();
        let mut imports: HashMap<String, &Name> = HashMap::with_capacity(raw.dependencies.len());
        for (name, dep) in &raw.dependencies {
            if let Some(other) = imports.insert(name.import_name(), name) {
                return Err(Error::invalid(
                    path,
                    format!("dependencies '{other}' and '{name}' import under the same name"),
                ));
            }
            let dep = dep
                .to_owned()
                .validate(name, registry)
                .map_err(|reason| Error::invalid(path, format!("dependency '{name}': {reason}")))?;
            dependencies.insert(name.clone(), dep);
        }

        Ok(Manifest {
            package: raw.package,
            dependencies,
            profile: raw.profile,
            sum: Sum::of_bytes(content.as_bytes()),
        })
    }

    /// The checksum of the manifest text, recorded in the lock file to detect edits.
    pub fn checksum(&self) -> Sum {
        self.sum
    }
}

#[cfg(test)]
mod test;
