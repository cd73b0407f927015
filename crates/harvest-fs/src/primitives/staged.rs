use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const PART_SUFFIX: &str = ".part";

/// The staging path a download for `dest` streams into before publish.
pub fn part_path(dest: impl AsRef<Path>) -> Result<PathBuf> {
    let dest = dest.as_ref();
    let name = dest
        .file_name()
        .ok_or_else(|| Error::NoFileName(dest.to_path_buf()))?;
    let mut part_name = name.to_os_string();
    part_name.push(PART_SUFFIX);
    Ok(dest.with_file_name(part_name))
}

/// Atomically move a fully validated staging file onto its destination.
///
/// Both paths live in the same directory, so the rename never crosses devices.
pub fn publish(part: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let part = part.as_ref();
    let dest = dest.as_ref();
    fs::rename(part, dest).map_err(|e| Error::Publish {
        from: part.to_path_buf(),
        to: dest.to_path_buf(),
        source: e,
    })
}

/// Remove a file if present. A missing file is not an error.
pub fn discard(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Remove a directory tree if present. A missing directory is not an error.
pub fn discard_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_part_path_appends_suffix() {
        let part = part_path("/data/raw/file.tar.gz").unwrap();
        assert_eq!(part, PathBuf::from("/data/raw/file.tar.gz.part"));
    }

    #[test]
    fn test_part_path_requires_file_name() {
        assert!(matches!(part_path("/"), Err(Error::NoFileName(_))));
    }

    #[test]
    fn test_publish_replaces_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let part = part_path(&dest).unwrap();
        fs::write(&dest, "old").unwrap();
        fs::write(&part, "new").unwrap();

        publish(&part, &dest).unwrap();

        assert!(!part.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_discard_missing_is_ok() {
        let dir = tempdir().unwrap();
        discard(dir.path().join("nothing")).unwrap();
        discard_dir(dir.path().join("nothing-dir")).unwrap();
    }
}
