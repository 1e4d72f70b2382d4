use std::path::Path;

use path_clean::PathClean;

use super::cache::{FetchCache, package_root};
use super::{Error, Fetch, Fetched, Fetcher};
use crate::archive;
use crate::lock::Pinned;
use crate::manifest::{TarDep, TarLocation};

impl Fetch for TarDep {
    async fn fetch(&self, fetcher: &Fetcher, base: &Path) -> Result<Fetched, Error> {
        let key = match &self.location {
            TarLocation::Path(path) => base.join(path).clean().display().to_string(),
            TarLocation::Url(url) => url.to_string(),
        };
        let dest = fetcher.cache().tar_dir(&key);
        let _guard = fetcher.cache().lock(&dest).await;

        // archives carry no immutable identity, so they are extracted afresh every time
        match &self.location {
            TarLocation::Path(path) => {
                let archive = base.join(path).clean();
                if !archive.is_file() {
                    return Err(Error::NotAFile(archive));
                }
                let dest = dest.clone();
                tokio::task::spawn_blocking(move || {
                    FetchCache::materialize(&dest, |tmp| {
                        archive::extract(&archive, tmp).map(drop).map_err(Error::from)
                    })
                })
                .await??;
            },
            TarLocation::Url(url) => {
                tracing::info!(%url, "downloading archive");
                let bytes = fetcher
                    .client()
                    .get(url.clone())
                    .send()
                    .await?
                    .error_for_status()?
                    .bytes()
                    .await?;
                let dest = dest.clone();
                tokio::task::spawn_blocking(move || {
                    FetchCache::materialize(&dest, |tmp| {
                        archive::extract_bytes(&bytes, tmp).map(drop).map_err(Error::from)
                    })
                })
                .await??;
            },
        }

        Ok(Fetched {
            dir: package_root(&dest),
            pinned: Pinned::Tar {
                tar: self.location.to_string(),
            },
        })
    }
}
