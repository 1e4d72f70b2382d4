//! # Run Pipeline
//!
//! Drives one compilation from a package on disk (or in an archive, or in a registry) to
//! an evaluated value:
//!
//! ```text
//! root resolved -> entries resolved -> dependencies resolved -> compiled
//! ```
//!
//! Every stage can fail, and a failure ends the run: a missing entry stops it before any
//! dependency is fetched, a failed fetch stops it before the compiler is invoked.

mod compiler;
mod options;
#[cfg(test)]
mod test;

use std::path::{Path, PathBuf};

use serde_json::Value;

pub use self::compiler::{Compiler, Invocation, KclCompiler};
pub use self::options::{CompileOptions, CompileOptionsBuilder};
use crate::lock::Pinned;
use crate::manifest::{Dependency, OciDep};
use crate::resolve::Resolver;
use crate::uri::OciReference;
use crate::{Error, Manifest, Name, archive, entry, vendor};

//================================================================================================
// Types
//================================================================================================

/// The evaluated output of a run, viewable as JSON or YAML.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileResult {
    value: Value,
}

//================================================================================================
// Impls
//================================================================================================

impl CompileResult {
    /// Wrap an evaluated value.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The evaluated value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The value as pretty printed JSON.
    pub fn json(&self) -> String {
        format!("{:#}", self.value)
    }

    /// The value as YAML.
    pub fn yaml(&self) -> crate::Result<String> {
        Ok(serde_yaml::to_string(&self.value)?)
    }
}

impl From<CompileResult> for Value {
    fn from(result: CompileResult) -> Self {
        result.value
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Run the package `opts` points at, directory or archive, with the configured compiler.
pub async fn run(opts: &CompileOptions) -> crate::Result<CompileResult> {
    run_with(opts, &KclCompiler::from_config(opts.config())).await
}

/// Like [`run`], with an explicit compiler.
pub async fn run_with<C: Compiler>(opts: &CompileOptions, compiler: &C) -> crate::Result<CompileResult> {
    let package = opts.package_path()?;
    if package.is_file() && archive::is_archive(&package) {
        run_tar_with(&package, opts, compiler).await
    } else {
        compile_root(&package, opts, compiler).await
    }
}

/// Run a package directory.
pub async fn run_pkg(opts: &CompileOptions) -> crate::Result<CompileResult> {
    let package = opts.package_path()?;
    compile_root(&package, opts, &KclCompiler::from_config(opts.config())).await
}

/// Unpack `archive` next to itself and run it with vendoring forced on.
///
/// The extracted directory is left in place afterwards.
pub async fn run_tar(archive: &Path, opts: &CompileOptions) -> crate::Result<CompileResult> {
    run_tar_with(archive, opts, &KclCompiler::from_config(opts.config())).await
}

/// Pull a package from a registry and run a scratch copy of it.
pub async fn run_oci(reference: &OciReference, opts: &CompileOptions) -> crate::Result<CompileResult> {
    run_oci_with(reference, opts, &KclCompiler::from_config(opts.config())).await
}

async fn run_tar_with<C: Compiler>(
    archive: &Path,
    opts: &CompileOptions,
    compiler: &C,
) -> crate::Result<CompileResult> {
    let path = archive.to_path_buf();
    let root = tokio::task::spawn_blocking(move || archive::unpack(&path))
        .await
        .map_err(|e| Error::io(archive)(std::io::Error::other(e)))??;
    opts.log()
        .line(format_args!("unpacked '{}' into '{}'", archive.display(), root.display()));
    compile_root(&root, &opts.vendored(), compiler).await
}

async fn run_oci_with<C: Compiler>(
    reference: &OciReference,
    opts: &CompileOptions,
    compiler: &C,
) -> crate::Result<CompileResult> {
    let name: Name = reference
        .repository
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|e| Error::invalid(reference.to_string(), format!("{e}")))?;
    let dep = Dependency::Oci(OciDep {
        reference: reference
            .clone()
            .pinned()
            .map_err(|e| Error::invalid(reference.to_string(), e.to_string()))?,
    });

    opts.log()
        .line(format_args!("downloading '{name}' from '{reference}'"));
    let fetched = opts.fetcher()?.fetch(&name, &dep, Path::new(".")).await?;
    if let Pinned::Oci { digest, .. } = &fetched.pinned {
        tracing::info!(%reference, %digest, "pulled package");
    }

    // the cached artifact is shared and immutable; lock and vendor writes go to a copy
    let scratch = tempfile::Builder::new()
        .prefix(&format!("{name}-"))
        .tempdir()
        .map_err(Error::io(std::env::temp_dir()))?;
    vendor::copy_tree(&fetched.dir, scratch.path()).map_err(Error::io(&fetched.dir))?;
    compile_root(scratch.path(), opts, compiler).await
}

/// Run the pipeline against a package directory.
async fn compile_root<C: Compiler>(
    root: &Path,
    opts: &CompileOptions,
    compiler: &C,
) -> crate::Result<CompileResult> {
    let root = root.canonicalize().map_err(|_| Error::ManifestNotFound {
        root: root.to_path_buf(),
    })?;
    let manifest = Manifest::load(&root, &opts.config().registry)?;

    let requested: Vec<PathBuf> = if !opts.entries().is_empty() {
        opts.entries().to_vec()
    } else if !manifest.profile.entries.is_empty() {
        manifest.profile.entries.clone()
    } else {
        vec![root.clone()]
    };
    let entries = entry::resolve_entries(&root, &requested)?;
    tracing::debug!(package = %manifest.package.name, entries = entries.len(), "entries resolved");

    let resolution = Resolver::new(opts.fetcher()?)
        .vendor(opts.vendor())
        .sum_check(opts.sum_check())
        .log(opts.log().clone())
        .resolve(&root)
        .await?;

    let invocation = Invocation {
        package: root.clone(),
        entries,
        externals: resolution
            .externals()
            .map(|(n, p)| (n.clone(), p.to_path_buf()))
            .collect(),
        settings: opts.settings().map(Path::to_path_buf),
        args: opts.args().to_vec(),
        work_dir: opts.work_dir().map_or_else(|| root.clone(), Path::to_path_buf),
    };
    let value = compiler.compile(&invocation).await?;
    tracing::info!(package = %manifest.package.name, "compiled package");
    Ok(CompileResult::new(value))
}
