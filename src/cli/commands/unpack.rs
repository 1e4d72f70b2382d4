//! The `unpack` subcommand.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// The `.tar`, `.tar.gz` or `.tgz` archive to unpack.
    archive: PathBuf,
}

pub(super) async fn run(args: Args) -> Result<()> {
    let archive = args.archive;
    let dest = tokio::task::spawn_blocking(move || pkg::archive::unpack(&archive)).await??;
    println!("{}", dest.display());
    Ok(())
}
