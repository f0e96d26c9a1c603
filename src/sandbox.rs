//! Confinement of client supplied tags and paths to the server base directory.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SyncError};

/// Converts a slash separated wire path into a relative path, rejecting
/// anything that could step outside the directory it is joined to.
pub fn safe_relative(p: &str) -> Result<PathBuf> {
    if p.contains('\0') {
        return Err(SyncError::Validation(format!("path {:?} contains NUL", p)));
    }
    let mut safe = PathBuf::new();
    for component in Path::new(p).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(s) => safe.push(s),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::Validation(format!(
                    "path {:?} contains disallowed component {:?}",
                    p, component
                )));
            }
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(SyncError::Validation(format!("empty path {:?}", p)));
    }
    Ok(safe)
}

/// Canonicalizes the longest existing ancestor of `p` and re-appends the
/// components that do not exist yet.
fn canonicalize_existing(p: &Path) -> Result<PathBuf> {
    let mut existing = p;
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut out = if existing.as_os_str().is_empty() {
        std::env::current_dir()?
    } else {
        existing.canonicalize()?
    };
    for name in rest.into_iter().rev() {
        out.push(name);
    }
    Ok(out)
}

fn contained(root: &Path, joined: PathBuf, shown: &str) -> Result<PathBuf> {
    let canonical_root = canonicalize_existing(root)?;
    let resolved = canonicalize_existing(&joined)?;
    if !resolved.starts_with(&canonical_root) || resolved == canonical_root {
        return Err(SyncError::PathEscape {
            path: shown.to_string(),
            root: root.display().to_string(),
        });
    }
    Ok(resolved)
}

/// The directory of one tag under the server base directory.
#[derive(Debug, Clone)]
pub struct TagRoot {
    dir: PathBuf,
}

impl TagRoot {
    pub fn new(basedir: &Path, tag: &str) -> Result<Self> {
        if tag.is_empty() {
            return Err(SyncError::Validation("Invalid tag. aborting".into()));
        }
        let rel = safe_relative(tag)?;
        let dir = contained(basedir, basedir.join(rel), tag)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves a record path under this tag, following existing symlinks
    /// and refusing results outside the tag directory.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = safe_relative(path)?;
        contained(&self.dir, self.dir.join(rel), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_pass() {
        assert_eq!(safe_relative("a/b/c").unwrap(), PathBuf::from("a/b/c"));
        assert_eq!(safe_relative("./a").unwrap(), PathBuf::from("a"));
    }

    #[test]
    fn traversal_and_absolute_paths_fail() {
        for bad in ["../x", "a/../../x", "/etc/passwd", "", ".", "a\0b"] {
            assert!(safe_relative(bad).is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn tag_must_be_non_empty_and_contained() {
        let base = tempfile::tempdir().unwrap();
        assert!(TagRoot::new(base.path(), "").is_err());
        assert!(TagRoot::new(base.path(), "..").is_err());
        let root = TagRoot::new(base.path(), "photos").unwrap();
        assert!(root.dir().ends_with("photos"));
        assert!(!root.dir().exists());
    }

    #[test]
    fn resolve_stays_inside_tag() {
        let base = tempfile::tempdir().unwrap();
        let root = TagRoot::new(base.path(), "t").unwrap();
        let p = root.resolve("sub/file.txt").unwrap();
        assert!(p.starts_with(root.dir()));
        assert!(root.resolve("../other/file").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_tag_is_refused() {
        let base = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("t")).unwrap();
        std::os::unix::fs::symlink(outside.path(), base.path().join("t/link")).unwrap();
        let root = TagRoot::new(base.path(), "t").unwrap();
        let err = root.resolve("link/file").unwrap_err();
        assert!(matches!(err, SyncError::PathEscape { .. }));
    }
}
