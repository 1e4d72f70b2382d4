//! The `resolve` subcommand.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// The package root; defaults to the current directory.
    path: Option<PathBuf>,
    /// Also rebuild `vendor/` from the resolved graph.
    #[arg(long)]
    vendor: bool,
    /// Skip verifying dependencies against `kcl.mod.lock`; no lock file is written.
    #[arg(long)]
    no_sum_check: bool,
}

pub(super) async fn run(args: Args) -> Result<()> {
    let (root, manifest) = super::package_root(args.path)?;
    let resolution = super::resolver()?
        .vendor(args.vendor)
        .sum_check(!args.no_sum_check)
        .resolve(&root)
        .await?;

    for dep in resolution.deps.values() {
        tracing::info!(
            dep.name = %dep.name,
            dep.version = dep.version.as_deref().unwrap_or("-"),
            dep.sum = %dep.sum,
            "resolved"
        );
    }
    if resolution.lock_written {
        tracing::info!(
            package = %manifest.package.name,
            path = %root.join(pkg::LOCK_NAME.as_str()).display(),
            "lock file updated"
        );
    } else if args.no_sum_check {
        tracing::warn!("sum-check disabled, lock file left untouched");
    }
    Ok(())
}
