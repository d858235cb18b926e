use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::OcirunResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single pulled image, as enumerated by [`list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    /// The image's repository, with `/` restored from the on-disk `_` join.
    pub repository: String,
    /// The image's tag.
    pub tag: String,
    /// The image's directory.
    pub path: PathBuf,
    /// The total size, in bytes, of every regular file under `path`.
    pub size_bytes: u64,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Enumerates every image directory under `artifacts_dir`.
///
/// Each child directory name is parsed by its rightmost `_` into
/// `(repoFlat, tag)`; `repoFlat`'s remaining `_` separators are restored to
/// `/` to recover the repository. Directories that don't parse this way are
/// skipped.
pub fn list(artifacts_dir: &Path) -> OcirunResult<Vec<ImageEntry>> {
    let mut entries = Vec::new();

    if !artifacts_dir.exists() {
        return Ok(entries);
    }

    for dir_entry in std::fs::read_dir(artifacts_dir)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }

        let name = dir_entry.file_name().to_string_lossy().into_owned();
        let Some(idx) = name.rfind('_') else {
            continue;
        };

        let (repo_flat, tag) = (&name[..idx], &name[idx + 1..]);
        let repository = repo_flat.replace('_', "/");
        let path = dir_entry.path();
        let size_bytes = directory_size(&path)?;

        entries.push(ImageEntry {
            repository,
            tag: tag.to_string(),
            path,
            size_bytes,
        });
    }

    Ok(entries)
}

fn directory_size(path: &Path) -> OcirunResult<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_list_empty_dir() {
        let dir = tempdir().unwrap();
        let entries = list(dir.path()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_list_parses_repo_and_tag() {
        let dir = tempdir().unwrap();
        let image_dir = dir.path().join("library_busybox_latest");
        fs::create_dir_all(&image_dir).unwrap();
        fs::write(image_dir.join("layer_001_sha256_abc.tar.gz"), b"hello").unwrap();

        let entries = list(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].repository, "library/busybox");
        assert_eq!(entries[0].tag, "latest");
        assert_eq!(entries[0].size_bytes, 5);
    }

    #[test]
    fn test_list_nonexistent_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let entries = list(&missing).unwrap();
        assert!(entries.is_empty());
    }
}
