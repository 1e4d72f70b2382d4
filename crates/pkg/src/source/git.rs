//! Git sources, backed by one bare repository per remote url in the fetch cache.
//!
//! Fetches run on the blocking pool. Dropping the async side (deadline, or an aborted
//! sibling fetch) raises the interrupt flag handed to gix, which stops the transfer at the
//! next opportunity.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bstr::ByteSlice;
use gix::create::{Kind, Options};
use gix::objs::tree::EntryKind;
use gix::remote::Direction;
use gix::{ObjectId, ThreadSafeRepository};
use lazy_regex::{Lazy, Regex};

use super::cache::{FetchCache, package_root};
use super::{Fetch, Fetched, Fetcher};
use crate::BoxError;
use crate::lock::Pinned;
use crate::manifest::{GitDep, GitRef};

static FULL_COMMIT: Lazy<Regex> = lazy_regex::lazy_regex!(r"^[0-9a-f]{40}$");

const HEADS: &str = "+refs/heads/*:refs/heads/*";
const TAGS: &str = "+refs/tags/*:refs/tags/*";

type ProgressRange = std::ops::RangeInclusive<prodash::progress::key::Level>;
const STANDARD_RANGE: ProgressRange = 2..=2;

//================================================================================================
// Types
//================================================================================================

/// Failures of the git fetcher.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The url could not be parsed.
    #[error(transparent)]
    Url(#[from] gix::url::parse::Error),
    /// The cache repository could not be created.
    #[error(transparent)]
    Init(#[from] Box<gix::init::Error>),
    /// The remote could not be configured.
    #[error(transparent)]
    RemoteInit(#[from] Box<gix::remote::init::Error>),
    /// A refspec was rejected.
    #[error(transparent)]
    Refspec(#[from] Box<gix::refspec::parse::Error>),
    /// The remote could not be reached.
    #[error(transparent)]
    Connect(#[from] Box<gix::remote::connect::Error>),
    /// The ref advertisement could not be negotiated.
    #[error(transparent)]
    Prepare(#[from] Box<gix::remote::fetch::prepare::Error>),
    /// The pack transfer failed.
    #[error(transparent)]
    Fetch(#[from] Box<gix::remote::fetch::Error>),
    /// The requested revision does not exist.
    #[error("no {kind} '{name}' in '{url}'")]
    NoRef {
        /// `tag` or `commit`.
        kind: &'static str,
        /// The requested revision.
        name: String,
        /// The repository url.
        url: String,
    },
    /// Reading objects while checking out a tree failed.
    #[error("failed to check out {commit}: {source}")]
    Checkout {
        /// The commit being checked out.
        commit: ObjectId,
        /// The underlying error.
        source: BoxError,
    },
    /// A filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Raises the interrupt flag when the owning future is dropped.
struct Interrupt(Arc<AtomicBool>);

//================================================================================================
// Impls
//================================================================================================

impl Error {
    pub(super) fn is_transient(&self) -> bool {
        matches!(self, Error::Connect(_) | Error::Fetch(_))
    }
}

impl Drop for Interrupt {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl Fetch for GitDep {
    async fn fetch(&self, fetcher: &Fetcher, _: &Path) -> Result<Fetched, super::Error> {
        let cache = fetcher.cache().clone();
        let _guard = cache.lock(&cache.git_db(&self.url)).await;

        let interrupt = Arc::new(AtomicBool::new(false));
        let _interrupt = Interrupt(interrupt.clone());
        let dep = self.clone();
        let fetched =
            tokio::task::spawn_blocking(move || dep.fetch_blocking(&cache, &interrupt)).await??;
        Ok(fetched)
    }
}

impl GitDep {
    fn fetch_blocking(&self, cache: &FetchCache, interrupt: &AtomicBool) -> Result<Fetched, Error> {
        let tag = match &self.reference {
            GitRef::Tag(tag) => Some(tag.clone()),
            GitRef::Commit(_) => None,
        };

        // a full hash already checked out needs neither the network nor the repository
        if let GitRef::Commit(commit) = &self.reference
            && FULL_COMMIT.is_match(commit)
        {
            let dir = cache.git_checkout(&self.url, commit);
            if dir.is_dir() {
                tracing::debug!(url = %self.url, %commit, "git checkout cache hit");
                return Ok(self.fetched(&dir, commit, tag));
            }
        }

        let repo = open_db(&cache.git_db(&self.url))?.to_thread_local();
        let id = match &self.reference {
            GitRef::Tag(tag) => {
                let spec = format!("+refs/tags/{tag}:refs/tags/{tag}");
                self.sync(&repo, [spec.as_str()], interrupt)?;
                resolve(&repo, &format!("refs/tags/{tag}"))
                    .ok_or_else(|| self.no_ref("tag", tag))?
            },
            GitRef::Commit(commit) => match resolve(&repo, commit) {
                Some(id) => id,
                None => {
                    self.sync(&repo, [HEADS, TAGS], interrupt)?;
                    resolve(&repo, commit).ok_or_else(|| self.no_ref("commit", commit))?
                },
            },
        };

        let commit = id.to_string();
        let dir = cache.git_checkout(&self.url, &commit);
        if !dir.is_dir() {
            checkout(&repo, id, &dir)?;
        }
        tracing::info!(url = %self.url, %commit, "resolved git dependency");
        Ok(self.fetched(&dir, &commit, tag))
    }

    fn sync<'a>(
        &self,
        repo: &gix::Repository,
        refspecs: impl IntoIterator<Item = &'a str>,
        interrupt: &AtomicBool,
    ) -> Result<(), Error> {
        use gix::progress::prodash::tree::Root;
        use gix::remote::fetch::Tags;
        use gix::remote::ref_map::Options;
        use tracing::level_filters::LevelFilter;

        let url = gix::url::parse(self.url.as_bytes().as_bstr())?;

        let tree = Root::new();
        let sync_progress = tree.add_child("sync");
        let init_progress = tree.add_child("init");
        let _render = if LevelFilter::current() > LevelFilter::WARN {
            Some(setup_line_renderer(&tree))
        } else {
            None
        };

        let mut remote = repo
            .remote_at(url)
            .map_err(Box::new)?
            .with_fetch_tags(Tags::None);
        remote
            .replace_refspecs(refspecs, Direction::Fetch)
            .map_err(Box::new)?;

        let query = remote
            .connect(Direction::Fetch)
            .map_err(Box::new)?
            .prepare_fetch(sync_progress, Options::default())
            .map_err(Box::new)?;

        query
            .with_write_packed_refs_only(true)
            .receive(init_progress, interrupt)
            .map_err(Box::new)?;

        Ok(())
    }

    fn fetched(&self, dir: &Path, commit: &str, tag: Option<String>) -> Fetched {
        Fetched {
            dir: package_root(dir),
            pinned: Pinned::Git {
                url: self.url.clone(),
                commit: commit.to_owned(),
                tag,
            },
        }
    }

    fn no_ref(&self, kind: &'static str, name: &str) -> Error {
        Error::NoRef {
            kind,
            name: name.to_owned(),
            url: self.url.clone(),
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

fn open_db(dir: &Path) -> Result<ThreadSafeRepository, Error> {
    Ok(ThreadSafeRepository::open(dir)
        .or_else(|_| {
            ThreadSafeRepository::init(
                dir,
                Kind::Bare,
                Options {
                    destination_must_be_empty: true,
                    ..Default::default()
                },
            )
        })
        .map_err(Box::new)?)
}

fn resolve(repo: &gix::Repository, rev: &str) -> Option<ObjectId> {
    repo.rev_parse_single(format!("{rev}^{{commit}}").as_str())
        .ok()
        .map(|id| id.detach())
}

/// Write the tree of `id` into `dest`, preserving executable bits and symlinks.
fn checkout(repo: &gix::Repository, id: ObjectId, dest: &Path) -> Result<(), Error> {
    use gix::traverse::tree::Recorder;

    let boxed = |e: BoxError| Error::Checkout {
        commit: id,
        source: e,
    };
    let tree = repo
        .find_commit(id)
        .map_err(|e| boxed(e.into()))?
        .tree()
        .map_err(|e| boxed(e.into()))?;
    let mut record = Recorder::default();
    tree.traverse()
        .depthfirst(&mut record)
        .map_err(|e| boxed(e.into()))?;

    FetchCache::materialize(dest, |tmp| {
        for entry in record.records {
            let full_path = tmp.join(entry.filepath.to_string());
            match entry.mode.kind() {
                EntryKind::Tree => fs::create_dir_all(&full_path)?,
                EntryKind::Blob | EntryKind::BlobExecutable => {
                    if let Some(parent) = full_path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let blob = repo
                        .find_object(entry.oid)
                        .map_err(|e| boxed(e.into()))?
                        .try_into_blob()
                        .map_err(|e| boxed(e.into()))?;
                    fs::write(&full_path, &blob.data)?;

                    #[cfg(unix)]
                    if entry.mode.is_executable() {
                        use std::os::unix::fs::PermissionsExt;
                        fs::set_permissions(&full_path, fs::Permissions::from_mode(0o755))?;
                    }
                },
                EntryKind::Link => {
                    if let Some(parent) = full_path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let blob = repo
                        .find_object(entry.oid)
                        .map_err(|e| boxed(e.into()))?
                        .try_into_blob()
                        .map_err(|e| boxed(e.into()))?;
                    let target = std::str::from_utf8(&blob.data).map_err(|e| boxed(e.into()))?;
                    #[cfg(unix)]
                    std::os::unix::fs::symlink(target, &full_path)?;
                    #[cfg(not(unix))]
                    tracing::warn!(link = %full_path.display(), %target, "symlinks are not materialized on this platform");
                },
                EntryKind::Commit => {
                    tracing::warn!(ignoring = %full_path.display(), "submodules are not checked out")
                },
            }
        }
        Ok(())
    })
}

fn setup_line_renderer(
    progress: &std::sync::Arc<prodash::tree::Root>,
) -> prodash::render::line::JoinHandle {
    prodash::render::line(
        std::io::stderr(),
        std::sync::Arc::downgrade(progress),
        prodash::render::line::Options {
            level_filter: Some(STANDARD_RANGE),
            initial_delay: Some(std::time::Duration::from_millis(500)),
            throughput: true,
            ..prodash::render::line::Options::default()
        }
        .auto_configure(prodash::render::line::StreamKind::Stderr),
    )
}
