//! Directory enumeration and content hashing.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::protocol::{Digest, FileRecord};

/// Returns the MD5 digest of the file at `path`.
pub fn sum(path: &Path) -> Result<Digest> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(ctx.compute().0)
}

/// Wire paths are strings, so a name that is not UTF-8 cannot be pushed.
fn utf8<'a>(name: &'a OsStr, full: &Path) -> Result<&'a str> {
    name.to_str().ok_or_else(|| {
        SyncError::Validation(format!("file name is not valid UTF-8: {}", full.display()))
    })
}

/// Lists every regular file under `directory`, recursively.
///
/// Record paths are relative to `directory` and always use `/` as separator,
/// so catalogs built on different hosts compare equal. Any read error, or a
/// name that is not UTF-8, fails the whole listing.
pub fn list(directory: &Path) -> Result<Vec<FileRecord>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(directory)
            .unwrap_or_else(|_| entry.path());
        let path = relative
            .components()
            .map(|c| utf8(c.as_os_str(), entry.path()))
            .collect::<Result<Vec<_>>>()?
            .join("/");
        files.push(FileRecord {
            name: utf8(entry.file_name(), entry.path())?.to_string(),
            hash: sum(entry.path())?,
            path,
            size: entry.metadata().map_err(std::io::Error::from)?.len(),
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_matches_known_md5() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("hello");
        std::fs::write(&p, b"hello world").unwrap();
        let hex: String = sum(&p).unwrap().iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn list_recurses_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("foo/deep")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("foo/bar"), b"22").unwrap();
        std::fs::write(dir.path().join("foo/deep/baz"), b"333").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let files = list(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["foo/bar", "foo/deep/baz", "top.txt"]);

        let baz = &files[1];
        assert_eq!(baz.name, "baz");
        assert_eq!(baz.size, 3);
        assert_eq!(baz.hash, md5::compute(b"333").0);
    }

    #[test]
    fn list_of_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list(&dir.path().join("nope")).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_name_fails_the_listing() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.txt"), b"ok").unwrap();
        std::fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff")), b"x").unwrap();

        let err = list(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)), "{err}");
        assert!(err.to_string().contains("not valid UTF-8"));
    }
}
