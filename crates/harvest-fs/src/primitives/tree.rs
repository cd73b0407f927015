use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Recursively list regular files under `root`, sorted, skipping `.part` files
/// and any directory named in `skip_dirs`.
pub fn list_files(root: impl AsRef<Path>, skip_dirs: &[&str]) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut files = Vec::new();
    if root.is_dir() {
        walk(root, skip_dirs, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, skip_dirs: &[&str], out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| Error::Read {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Read {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| Error::Read {
            path: path.clone(),
            source: e,
        })?;
        if file_type.is_dir() {
            let name = entry.file_name();
            if skip_dirs.iter().any(|s| name == *s) {
                continue;
            }
            walk(&path, skip_dirs, out)?;
        } else if file_type.is_file() {
            let is_part = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(super::staged::PART_SUFFIX));
            if !is_part {
                out.push(path);
            }
        }
    }
    Ok(())
}

/// Total size in bytes of all regular files under `root` (symlinks are not followed).
pub fn dir_size(root: impl AsRef<Path>) -> Result<u64> {
    let mut total = 0u64;
    for file in list_files(root, &[])? {
        let meta = fs::symlink_metadata(&file).map_err(|e| Error::Read {
            path: file.clone(),
            source: e,
        })?;
        total = total.saturating_add(meta.len());
    }
    Ok(total)
}

/// Reduce an identifier to a single safe path component.
///
/// Separators and other reserved characters become `_`; `.`/`..` and empty
/// identifiers are rejected.
pub fn safe_component(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(Error::InvalidComponent(raw.to_string()));
    }
    Ok(cleaned)
}
