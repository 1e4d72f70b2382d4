//! Command line parsing and dispatch for `kpm`.

mod commands;
pub mod logging;

use std::path::PathBuf;

use clap::Parser;
pub use commands::run;
pub use logging::init_global_subscriber;

/// Top level arguments shared by every subcommand.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Run as if kpm was started in DIR
    ///
    /// Relative paths given to any subcommand (entries, `--package`, archives) are then
    /// taken relative to DIR, and the package root defaults to it.
    #[arg(
        short = 'C',
        long = "directory",
        value_name = "DIR",
        global = true,
        value_parser = package_dir
    )]
    directory: Option<PathBuf>,

    /// Logging options.
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    command: commands::Commands,
}

/// Verbosity flags, consumed by [`init_global_subscriber`].
#[derive(Parser, Clone, Copy, Debug)]
#[command(next_help_heading = "Log Options")]
pub struct LogArgs {
    /// Log more: `-v` adds debug events, `-vv` adds trace events
    ///
    /// `RUST_LOG` (e.g. `RUST_LOG=debug`) takes precedence when set. Fetch progress and
    /// compiler output are not affected.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    /// Log less: `-q` keeps warnings and errors, `-qq` errors only
    ///
    /// Overrides both `--verbosity` and `RUST_LOG`.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,
}

impl Args {
    /// Switch into the `-C` directory, if one was given.
    pub fn enter_directory(&self) -> std::io::Result<()> {
        match &self.directory {
            Some(dir) => std::env::set_current_dir(dir),
            None => Ok(()),
        }
    }
}

/// `-C` must name an existing directory; it is made absolute before anything else runs.
fn package_dir(path: &str) -> Result<PathBuf, String> {
    let dir = std::fs::canonicalize(path).map_err(|e| format!("'{path}': {e}"))?;
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(format!("'{path}' is not a directory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_must_exist() {
        assert!(package_dir("/definitely/not/here").is_err());
        assert!(package_dir(env!("CARGO_MANIFEST_DIR")).is_ok());
    }

    #[test]
    fn directory_rejects_files() {
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        assert!(package_dir(manifest).is_err());
    }
}
