//! # pkg
//!
//! The `pkg` crate implements the package side of `kpm`, the package manager for the KCL
//! configuration language. It decides what a package on disk consists of, where its
//! dependencies come from, whether they may be trusted as-is, and how they are fetched,
//! unpacked and vendored before the compiler ever sees them.
//!
//! ## Key Concepts
//!
//! **Manifests** (`kcl.mod`) declare a package's identity and dependencies. Every
//! dependency comes from exactly one source kind: a local path, a git repository pinned
//! to a commit or tag, an OCI registry artifact, or a tar archive.
//!
//! **Lock files** (`kcl.mod.lock`) record the resolved graph: each dependency's pinned
//! locator (tags resolved to commits, OCI tags resolved to digests) and a content checksum
//! of its materialized tree. The "sum-check" compares fetched trees against those
//! checksums on every run.
//!
//! ## Architecture
//!
//! - [`manifest`] and [`lock`] model the two files.
//! - [`checksum`] computes order-independent directory checksums.
//! - [`source`] holds one fetcher per source kind plus the injectable fetch cache.
//! - [`resolve`] drives the fan-out fetch, the sum-check and lock maintenance.
//! - [`vendor`] and [`archive`] materialize vendored trees and pack/unpack packages.
//! - [`entry`] maps user supplied entry paths to files on disk.
//! - [`run`] is the orchestrator that hands a resolved package to the compiler.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use pkg::run::{CompileOptions, run};
//!
//! # async fn example() -> Result<(), pkg::Error> {
//! let opts = CompileOptions::builder()
//!     .package("./my-pkg")
//!     .entry("main.k")
//!     .build();
//! let result = run(&opts).await?;
//! println!("{}", result.yaml()?);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

use std::sync::LazyLock;

pub use self::checksum::Sum;
pub use self::error::{Error, ErrorKind, Result};
pub use self::id::Name;
pub use self::lock::Lockfile;
pub use self::manifest::Manifest;
pub use self::source::FetchCache;

pub mod archive;
pub mod checksum;
pub mod entry;
mod error;
pub mod id;
pub mod lock;
pub mod log;
pub mod manifest;
pub mod resolve;
pub mod run;
pub mod source;
pub mod uri;
pub mod vendor;

const KCL: &str = "kcl";
const MOD: &str = "mod";
const LOCK: &str = "lock";
/// The base32 alphabet used for encoding checksums.
///
/// This uses the RFC4648 hex alphabet without padding, which keeps the encoded
/// form short and free of characters that need quoting anywhere.
const BASE32: base32::Alphabet = base32::Alphabet::Rfc4648HexLower { padding: false };

/// The conventional filename for a package manifest (`kcl.mod`).
pub static MANIFEST_NAME: LazyLock<String> = LazyLock::new(|| format!("{}.{}", KCL, MOD));
/// The conventional filename for a package lock file (`kcl.mod.lock`).
pub static LOCK_NAME: LazyLock<String> = LazyLock::new(|| format!("{}.{}.{}", KCL, MOD, LOCK));
/// The name of the vendor directory below a package root.
pub const VENDOR_DIR: &str = "vendor";

/// A boxed, thread safe error used where the concrete type does not matter to callers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
