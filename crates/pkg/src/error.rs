//! The error taxonomy shared by every stage of the pipeline.

use std::path::{Path, PathBuf};

use thiserror::Error as ThisError;

use crate::Name;
use crate::checksum::Sum;
use crate::manifest::SourceKind;

/// A specialized result type for package operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can make a resolution or run fail.
///
/// All variants are terminal for the run that produced them; each carries the context
/// needed to act on it without re-running with more logging.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The package root has no manifest.
    #[error("could not load 'kcl.mod' in '{}'", .root.display())]
    ManifestNotFound {
        /// The directory that was searched.
        root: PathBuf,
    },
    /// A manifest or lock file is not syntactically valid.
    #[error("failed to parse '{}': {source}", .path.display())]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// The underlying deserialization failure.
        source: toml_edit::de::Error,
    },
    /// A declaration is structurally invalid.
    #[error("invalid declaration in '{}': {reason}", .path.display())]
    Validation {
        /// The file containing the declaration.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// A dependency's content does not match the lock file.
    #[error(
        "checksum mismatch for dependency '{name}' at '{}': expected {expected}, found {found}",
        .path.display()
    )]
    ChecksumMismatch {
        /// The dependency that failed verification.
        name: Name,
        /// The directory whose content was hashed.
        path: PathBuf,
        /// The checksum recorded in the lock file.
        expected: Sum,
        /// The checksum of the tree on disk.
        found: Sum,
    },
    /// A dependency could not be fetched.
    #[error("failed to fetch dependency '{name}' from {kind} source: {source}")]
    SourceUnavailable {
        /// The dependency being fetched.
        name: Name,
        /// Which fetcher failed.
        kind: SourceKind,
        /// The underlying cause.
        source: crate::source::Error,
    },
    /// An entry file could not be found anywhere.
    #[error("cannot find the kcl file, please check the file path {}", .path.display())]
    PathNotFound {
        /// The last candidate path that was tried.
        path: PathBuf,
    },
    /// A local dependency points at a path that does not exist.
    #[error("local dependency '{name}' not found at '{}'", .path.display())]
    MissingLocal {
        /// The dependency name.
        name: Name,
        /// The resolved path.
        path: PathBuf,
    },
    /// The external compiler rejected the package.
    #[error("failed to compile the kcl package '{}'\n{message}", .package.display())]
    Compile {
        /// The package root that was compiled.
        package: PathBuf,
        /// Compiler diagnostics, verbatim.
        message: String,
    },
    /// Packing or unpacking an archive failed.
    #[error(transparent)]
    Archive(#[from] crate::archive::Error),
    /// Writing the lock file failed to serialize.
    #[error(transparent)]
    Serialize(#[from] toml_edit::ser::Error),
    /// The compiler output could not be rendered.
    #[error(transparent)]
    Render(#[from] serde_yaml::Error),
    /// A filesystem operation failed.
    #[error("i/o error at '{}': {source}", .path.display())]
    Io {
        /// The path being operated on.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

/// Coarse classification of an [`Error`], for callers that only branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed manifest or lock file.
    Parse,
    /// Structurally invalid declarations.
    Validation,
    /// Sum-check failure.
    ChecksumMismatch,
    /// Network, authentication or ref resolution failure.
    SourceUnavailable,
    /// A required path is missing.
    PathNotFound,
    /// The compiler reported a failure.
    Compile,
    /// Local filesystem or archive failure.
    Io,
}

impl Error {
    /// The taxonomy bucket this error falls in.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Error::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Error::ManifestNotFound { .. }
            | Error::PathNotFound { .. }
            | Error::MissingLocal { .. } => ErrorKind::PathNotFound,
            Error::Compile { .. } => ErrorKind::Compile,
            Error::Archive(_) | Error::Serialize(_) | Error::Render(_) | Error::Io { .. } => {
                ErrorKind::Io
            },
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| Error::Io { path, source }
    }

    pub(crate) fn invalid(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Validation {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}
