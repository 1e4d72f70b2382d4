//! # Entry Resolution
//!
//! Maps the entry paths a user asks to compile onto files that exist. Lookup order:
//!
//! 1. an absolute path that exists, unchanged;
//! 2. the path relative to the package root;
//! 3. the path relative to the current directory, made absolute.
//!
//! Package relative lookup comes first so two packages run from the same shell location
//! cannot shadow each other's entries.

use std::path::{Path, PathBuf};

use path_clean::PathClean;

use crate::Error;

/// Resolve `input` against `package`, or fail naming the last candidate tried.
pub fn resolve_entry(package: &Path, input: &Path) -> crate::Result<PathBuf> {
    if input.is_absolute() {
        return if input.exists() {
            Ok(input.to_path_buf())
        } else {
            Err(Error::PathNotFound {
                path: input.to_path_buf(),
            })
        };
    }

    let in_package = package.join(input).clean();
    if in_package.exists() {
        return Ok(in_package);
    }

    let cwd = std::env::current_dir().map_err(Error::io("."))?;
    let in_cwd = cwd.join(input).clean();
    if in_cwd.exists() {
        tracing::debug!(entry = %in_cwd.display(), "entry resolved against the working directory");
        return Ok(in_cwd);
    }

    Err(Error::PathNotFound { path: in_cwd })
}

/// Resolve every entry, failing on the first that cannot be found.
pub fn resolve_entries(package: &Path, inputs: &[PathBuf]) -> crate::Result<Vec<PathBuf>> {
    inputs.iter().map(|i| resolve_entry(package, i)).collect()
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn absolute_paths_pass_through() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("main.k");
        fs::write(&file, "")?;
        assert_eq!(resolve_entry(Path::new("/elsewhere"), &file)?, file);

        let missing = dir.path().join("gone.k");
        let err = resolve_entry(dir.path(), &missing).expect_err("file does not exist");
        assert!(matches!(err, Error::PathNotFound { path } if path == missing));
        Ok(())
    }

    #[test]
    fn package_relative_entries_are_cleaned() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("sub"))?;
        fs::write(dir.path().join("main.k"), "")?;
        assert_eq!(
            resolve_entry(dir.path(), Path::new("./sub/../main.k"))?,
            dir.path().join("main.k")
        );
        Ok(())
    }

    #[test]
    fn package_root_wins_over_working_directory() -> anyhow::Result<()> {
        // tests run with the crate directory as working directory
        let cwd = std::env::current_dir()?;
        assert!(cwd.join("Cargo.toml").exists());

        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("Cargo.toml"), "")?;
        assert_eq!(
            resolve_entry(dir.path(), Path::new("Cargo.toml"))?,
            dir.path().join("Cargo.toml")
        );

        let empty = tempfile::tempdir()?;
        assert_eq!(
            resolve_entry(empty.path(), Path::new("Cargo.toml"))?,
            cwd.join("Cargo.toml")
        );
        Ok(())
    }

    #[test]
    fn missing_entries_name_the_last_candidate() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let err = resolve_entries(dir.path(), &["definitely-not-here.k".into()])
            .expect_err("entry does not exist");
        let Error::PathNotFound { path } = err else {
            anyhow::bail!("unexpected error: {err}");
        };
        assert!(path.is_absolute());
        assert!(path.ends_with("definitely-not-here.k"));
        Ok(())
    }
}
