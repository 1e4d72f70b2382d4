//! The main entry point for the kpm CLI.

#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use kpm::cli::{self, Args};

//================================================================================================
// Functions
//================================================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = cli::init_global_subscriber(args.log);

    if let Err(e) = args.enter_directory() {
        kpm::fatal!(e);
        return ExitCode::FAILURE;
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Ctrl+C received, terminating...");
            ExitCode::from(130)
        }
        res = cli::run(args) => {
            if let Err(e) = res {
                kpm::fatal!(e);
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}
