use std::path::Path;

use path_clean::PathClean;

use super::{Error, Fetch, Fetched, Fetcher};
use crate::lock::Pinned;
use crate::manifest::LocalDep;

impl Fetch for LocalDep {
    async fn fetch(&self, _: &Fetcher, base: &Path) -> Result<Fetched, Error> {
        let dir = base.join(&self.path).clean();
        if !dir.is_dir() {
            return Err(Error::NotADirectory(dir));
        }
        tracing::debug!(dir = %dir.display(), "using local dependency in place");
        Ok(Fetched {
            dir,
            pinned: Pinned::Local {
                local: self.path.clone(),
            },
        })
    }
}
