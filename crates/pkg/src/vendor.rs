//! # Vendoring
//!
//! Copies every resolved dependency into `<root>/vendor/<name>` so the package can be
//! rebuilt without network access. The vendor directory is rebuilt wholesale: the new tree
//! is assembled in a temporary sibling and swapped in, so dependencies dropped from the
//! graph never linger and an interrupted run leaves the previous copy intact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{Error, Name, VENDOR_DIR};

/// The vendor directory of the package at `root`.
pub fn dir(root: &Path) -> PathBuf {
    root.join(VENDOR_DIR)
}

/// Replace `<root>/vendor` with copies of `deps`, returning each dependency's vendored path.
///
/// Sources that already live inside the vendor directory are copied out of the old tree
/// before it is replaced.
pub fn vendor<'a>(
    root: &Path,
    deps: impl IntoIterator<Item = (&'a Name, &'a Path)>,
) -> crate::Result<Vec<(Name, PathBuf)>> {
    let target = dir(root);
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{VENDOR_DIR}"))
        .tempdir_in(root)
        .map_err(Error::io(root))?;

    let mut vendored = Vec::new();
    for (name, src) in deps {
        let dest = staging.path().join(name);
        copy_tree(src, &dest).map_err(Error::io(src))?;
        tracing::debug!(dep.name = %name, src = %src.display(), "vendored dependency");
        vendored.push((name.clone(), target.join(name)));
    }

    if target.exists() {
        fs::remove_dir_all(&target).map_err(Error::io(&target))?;
    }
    let staged = staging.keep();
    fs::rename(&staged, &target).map_err(Error::io(&target))?;

    tracing::info!(dir = %target.display(), count = vendored.len(), "rebuilt vendor directory");
    Ok(vendored)
}

/// Recursively copy `src` to `dest`, preserving symlinks and skipping `.git`.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let kind = entry.file_type()?;
        if kind.is_dir() {
            copy_tree(&from, &to)?;
        } else if kind.is_symlink() {
            let target = fs::read_link(&from)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(target, &to)?;
            #[cfg(not(unix))]
            fs::copy(from.parent().unwrap_or(src).join(target), &to).map(drop)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checksum::Sum;

    #[test]
    fn vendor_is_rebuilt_wholesale() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("app");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        for d in [&root, &a, &b] {
            fs::create_dir_all(d)?;
        }
        fs::write(a.join("a.k"), "a = 1")?;
        fs::create_dir_all(a.join(".git"))?;
        fs::write(b.join("b.k"), "b = 1")?;

        let (na, nb): (Name, Name) = ("a".parse()?, "b".parse()?);
        let first = vendor(&root, [(&na, a.as_path()), (&nb, b.as_path())])?;
        assert_eq!(first[0].1, root.join("vendor/a"));
        assert_eq!(Sum::of_dir(&a)?, Sum::of_dir(&root.join("vendor/a"))?);
        assert!(!root.join("vendor/a/.git").exists());

        vendor(&root, [(&na, a.as_path())])?;
        assert!(root.join("vendor/a/a.k").exists());
        assert!(!root.join("vendor/b").exists());
        Ok(())
    }

    #[test]
    fn vendored_sources_survive_their_own_rebuild() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("vendor/a"))?;
        fs::write(root.join("vendor/a/a.k"), "a = 1")?;

        let name: Name = "a".parse()?;
        let src = root.join("vendor/a");
        vendor(root, [(&name, src.as_path())])?;
        assert_eq!(fs::read_to_string(root.join("vendor/a/a.k"))?, "a = 1");
        Ok(())
    }
}
