//! The `vendor` subcommand.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// The package root; defaults to the current directory.
    path: Option<PathBuf>,
}

pub(super) async fn run(args: Args) -> Result<()> {
    let (root, _) = super::package_root(args.path)?;
    let resolution = super::resolver()?.vendor(true).resolve(&root).await?;
    tracing::info!(
        count = resolution.deps.len(),
        dir = %pkg::vendor::dir(&resolution.root).display(),
        "vendored dependencies"
    );
    Ok(())
}
