//! # Dependency Sources
//!
//! One fetcher per [`SourceKind`]. Each turns a validated [`Dependency`] into a directory
//! on disk plus the [`Pinned`] locator that identifies exactly what was fetched:
//!
//! - **local**: the declared directory itself, nothing is copied.
//! - **git**: a bare repository per url in the cache; tags are resolved against the remote
//!   on every fetch, commits already present are served without touching the network.
//! - **oci**: the OCI distribution protocol; a tag is resolved to the manifest digest and
//!   every blob is verified against its digest before it is extracted.
//! - **tar**: a local archive or an `http(s)` download, extracted into the cache.
//!
//! [`Fetcher::fetch`] wraps every attempt in the configured deadline and retries failures
//! classified as transient. A deadline that passes is not retried; the in-flight attempt is
//! dropped, which also stops a running git transfer.

pub mod cache;
mod git;
mod local;
mod oci;
mod tar;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use config::RegistryConfig;
use tracing::Instrument;

pub use self::cache::FetchCache;
pub use self::git::Error as GitError;
pub use self::oci::Error as OciError;
use crate::Name;
use crate::lock::Pinned;
use crate::manifest::{Dependency, SourceKind};

const BACKOFF: Duration = Duration::from_millis(500);

//================================================================================================
// Types
//================================================================================================

/// Why a single fetch failed.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A local source does not point at a directory.
    #[error("'{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),
    /// A local archive does not exist.
    #[error("'{}' does not exist", .0.display())]
    NotAFile(PathBuf),
    /// The fetch did not finish before the deadline.
    #[error("fetch did not complete within {}s", .0.as_secs())]
    Timeout(Duration),
    /// A git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),
    /// A registry operation failed.
    #[error(transparent)]
    Oci(#[from] OciError),
    /// An http transfer failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// A fetched archive could not be extracted.
    #[error(transparent)]
    Archive(#[from] crate::archive::Error),
    /// A filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A blocking fetch task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// A dependency materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// The package root of the fetched tree.
    pub dir: PathBuf,
    /// What exactly was fetched.
    pub pinned: Pinned,
}

/// Fetches dependencies of every source kind through a shared cache.
#[derive(Debug, Clone)]
pub struct Fetcher {
    cache: Arc<FetchCache>,
    client: reqwest::Client,
    registry: RegistryConfig,
    deadline: Duration,
    retries: u32,
}

/// One fetch attempt for a declaration of a given source kind.
pub(crate) trait Fetch {
    /// Materialize the dependency. Relative locators are resolved against `base`, the
    /// root of the declaring package.
    fn fetch(
        &self,
        fetcher: &Fetcher,
        base: &Path,
    ) -> impl Future<Output = Result<Fetched, Error>> + Send;
}

//================================================================================================
// Impls
//================================================================================================

impl Error {
    /// Whether retrying the same fetch may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => is_transient_http(e),
            Error::Git(e) => e.is_transient(),
            Error::Oci(e) => e.is_transient(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

impl Fetcher {
    /// A fetcher using `cache` and the fetch and registry settings of `config`.
    pub fn new(cache: Arc<FetchCache>, config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kpm/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            cache,
            client,
            registry: config.registry.clone(),
            deadline: config.fetch.deadline(),
            retries: config.fetch.retries,
        })
    }

    /// Override the per-fetch deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override how often transient failures are retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// The cache this fetcher writes to.
    pub fn cache(&self) -> &Arc<FetchCache> {
        &self.cache
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn registry(&self) -> &RegistryConfig {
        &self.registry
    }

    /// Fetch `dep`, declared by the package rooted at `base`, under the deadline and retry
    /// policy.
    pub async fn fetch(&self, name: &Name, dep: &Dependency, base: &Path) -> crate::Result<Fetched> {
        let span = tracing::info_span!("fetch", dep.name = %name, dep.kind = %dep.kind());
        crate::log::set_sub_task(&span, &format!("fetching {name}"));

        self.fetch_with_retry(name, dep, base)
            .instrument(span)
            .await
            .map_err(|source| match source {
                Error::NotADirectory(path) if dep.kind() == SourceKind::Local => {
                    crate::Error::MissingLocal {
                        name: name.clone(),
                        path,
                    }
                },
                source => crate::Error::SourceUnavailable {
                    name: name.clone(),
                    kind: dep.kind(),
                    source,
                },
            })
    }

    async fn fetch_with_retry(
        &self,
        name: &Name,
        dep: &Dependency,
        base: &Path,
    ) -> Result<Fetched, Error> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.deadline, self.attempt(dep, base))
                .await
                .unwrap_or_else(|_| Err(Error::Timeout(self.deadline)));
            match result {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        dep.name = %name,
                        attempt,
                        error = %e,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(BACKOFF * attempt).await;
                },
                result => return result,
            }
        }
    }

    async fn attempt(&self, dep: &Dependency, base: &Path) -> Result<Fetched, Error> {
        match dep {
            Dependency::Local(dep) => dep.fetch(self, base).await,
            Dependency::Git(dep) => dep.fetch(self, base).await,
            Dependency::Oci(dep) => dep.fetch(self, base).await,
            Dependency::Tar(dep) => dep.fetch(self, base).await,
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

fn is_transient_http(e: &reqwest::Error) -> bool {
    e.is_connect()
        || e.is_timeout()
        || e
            .status()
            .is_some_and(|s| s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS)
}
