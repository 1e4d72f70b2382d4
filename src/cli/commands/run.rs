//! The `run` subcommand.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use pkg::run::CompileOptions;
use pkg::uri::OciReference;

//================================================================================================
// Types
//================================================================================================

#[derive(Parser, Debug)]
pub struct Args {
    /// Entry files to compile, relative to the package root or the current directory.
    entries: Vec<PathBuf>,
    /// The package directory or `.tar`/`.tgz` archive to run.
    #[arg(long, value_name = "PATH")]
    package: Option<PathBuf>,
    /// Pull the package from an OCI registry instead, e.g. `ghcr.io/kcl-lang/k8s:1.28`.
    #[arg(long, value_name = "REF", conflicts_with = "package")]
    oci: Option<OciReference>,
    /// Resolve dependencies into `vendor/` and compile against the vendored copies.
    #[arg(long)]
    vendor: bool,
    /// Skip verifying dependencies against `kcl.mod.lock`; no lock file is written.
    #[arg(long)]
    no_sum_check: bool,
    /// A settings file forwarded to the compiler.
    #[arg(short = 'Y', long, value_name = "FILE")]
    settings: Option<PathBuf>,
    /// How to print the result.
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    format: Format,
    /// Extra arguments passed through to the compiler verbatim.
    #[arg(last = true)]
    extra: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

//================================================================================================
// Functions
//================================================================================================

pub(super) async fn run(args: Args) -> Result<()> {
    let mut builder = CompileOptions::builder()
        .entries(args.entries)
        .vendor(args.vendor)
        .no_sum_check(args.no_sum_check)
        .args(args.extra);
    if let Some(package) = args.package {
        builder = builder.package(package);
    }
    if let Some(settings) = args.settings {
        builder = builder.settings(settings);
    }
    let opts = builder.build();

    let result = match &args.oci {
        Some(reference) => pkg::run::run_oci(reference, &opts).await?,
        None => pkg::run::run(&opts).await?,
    };

    let rendered = match args.format {
        Format::Yaml => result.yaml()?,
        Format::Json => result.json() + "\n",
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
