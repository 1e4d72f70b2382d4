//! The `pack` subcommand.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// The package root; defaults to the current directory.
    path: Option<PathBuf>,
    /// Vendor dependencies first and include `vendor/`, making the archive self-contained.
    #[arg(long)]
    vendor: bool,
    /// The archive to write; defaults to `<name>-<version>.tar` in the current directory.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

pub(super) async fn run(args: Args) -> Result<()> {
    let (root, manifest) = super::package_root(args.path)?;
    if args.vendor {
        super::resolver()?.vendor(true).resolve(&root).await?;
    }

    let dest = match args.output {
        Some(dest) => dest,
        None => {
            let name = &manifest.package.name;
            let file = match &manifest.package.version {
                Some(version) => format!("{name}-{version}.tar"),
                None => format!("{name}.tar"),
            };
            std::env::current_dir()?.join(file)
        },
    };

    let (src, out) = (root.clone(), dest.clone());
    tokio::task::spawn_blocking(move || pkg::archive::pack(&src, &out, args.vendor)).await??;
    tracing::info!(package = %manifest.package.name, archive = %dest.display(), "packed");
    Ok(())
}
