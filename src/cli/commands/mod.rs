mod pack;
mod resolve;
mod run;
mod unpack;
mod vendor;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use pkg::resolve::Resolver;
use pkg::source::Fetcher;
use pkg::{FetchCache, Manifest};

use super::Args;

#[derive(Subcommand)]
pub(super) enum Commands {
    /// Compile a package and print the result.
    ///
    /// The package is resolved first: every dependency is fetched (or taken from the
    /// cache or `vendor/`), verified against `kcl.mod.lock`, and handed to the compiler
    /// as an external package. Entries default to the `[profile]` entries of the
    /// manifest, or the package root itself.
    #[command(verbatim_doc_comment)]
    Run(run::Args),
    /// Resolve the dependencies of the current package.
    ///
    /// This fetches every direct and transitive dependency, checks them against the
    /// lock file and rewrites `kcl.mod.lock` when the graph changed.
    #[command(verbatim_doc_comment)]
    Resolve(resolve::Args),
    /// Copy every dependency into the package's `vendor/` directory.
    ///
    /// A vendored package resolves without network access as long as its lock file
    /// is current.
    #[command(verbatim_doc_comment)]
    Vendor(vendor::Args),
    /// Pack the current package into a tar archive.
    #[command(verbatim_doc_comment)]
    Pack(pack::Args),
    /// Unpack a package archive next to itself.
    #[command(verbatim_doc_comment)]
    Unpack(unpack::Args),
}

/// Dispatch the parsed subcommand.
pub async fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Commands::Run(args) => run::run(args).await?,
        Commands::Resolve(args) => resolve::run(args).await?,
        Commands::Vendor(args) => vendor::run(args).await?,
        Commands::Pack(args) => pack::run(args).await?,
        Commands::Unpack(args) => unpack::run(args).await?,
    }
    Ok(())
}

/// A resolver over the configured cache, registry and fetch policy.
fn resolver() -> anyhow::Result<Resolver> {
    let fetcher = Fetcher::new(Arc::new(FetchCache::from_config()), &config::CONFIG)?;
    Ok(Resolver::new(fetcher))
}

/// The package root `path` points into, after checking it holds a manifest.
fn package_root(path: Option<PathBuf>) -> anyhow::Result<(PathBuf, Manifest)> {
    let root = match path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let manifest = Manifest::load(&root, &config::CONFIG.registry)?;
    Ok((root, manifest))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("kpm").chain(argv.iter().copied()))
    }

    #[test]
    fn extra_compiler_arguments_follow_the_separator() -> anyhow::Result<()> {
        let args = parse(&["run", "main.k", "--format", "json", "--", "-D", "env=prod"])?;
        let Commands::Run(cmd) = args.command else {
            anyhow::bail!("expected the run subcommand");
        };
        insta::assert_debug_snapshot!(cmd, @r#"
        Args {
            entries: [
                "main.k",
            ],
            package: None,
            oci: None,
            vendor: false,
            no_sum_check: false,
            settings: None,
            format: Json,
            extra: [
                "-D",
                "env=prod",
            ],
        }
        "#);
        Ok(())
    }

    #[test]
    fn oci_and_package_are_exclusive() {
        assert!(parse(&["run", "--package", "pkg", "--oci", "ghcr.io/kcl-lang/k8s:1.28"]).is_err());
    }

    #[test]
    fn oci_references_are_parsed_up_front() {
        assert!(parse(&["run", "--oci", "not a reference"]).is_err());
    }

    #[test]
    fn unpack_needs_an_archive() {
        assert!(parse(&["unpack"]).is_err());
    }
}
