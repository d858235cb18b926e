use std::{
    fs::File,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use ocirun_utils::entry_stays_within_root;
use tar::Archive;

use crate::{config::ROOTFS_TMP_PREFIX, OcirunError, OcirunResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds a scratch root filesystem from `image_dir`'s layers.
///
/// Layers are enumerated lexically by filename (`layer_NNN_*.tar.gz`), which
/// is also extraction order (§3). Each layer is extracted in full into a
/// fresh temporary directory; later layers overwrite earlier ones. Tar
/// whiteout files (`.wh.*`) are not interpreted — they are extracted as
/// regular, inert files, matching this runtime's simplified overlay model.
///
/// Returns the path to the fresh rootfs directory; the caller owns its
/// removal.
pub fn build(image_dir: &Path) -> OcirunResult<PathBuf> {
    let mut layers: Vec<PathBuf> = std::fs::read_dir(image_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("layer_") && n.ends_with(".tar.gz"))
        })
        .collect();
    layers.sort();

    if layers.is_empty() {
        return Err(OcirunError::NoLayers(image_dir.display().to_string()));
    }

    let tmp_dir = tempfile::Builder::new()
        .prefix(ROOTFS_TMP_PREFIX)
        .tempdir()?;
    let rootfs = tmp_dir.into_path();

    for layer_path in &layers {
        extract_layer(layer_path, &rootfs)?;
    }

    Ok(rootfs)
}

fn extract_layer(layer_path: &Path, rootfs: &Path) -> OcirunResult<()> {
    let file = File::open(layer_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        if !entry_stays_within_root(&entry_path) {
            tracing::warn!(
                path = %entry_path.display(),
                layer = %layer_path.display(),
                "rejecting archive entry that would escape the rootfs"
            );
            continue;
        }

        entry.unpack_in(rootfs)?;
    }

    Ok(())
}

/// Removes a rootfs directory previously returned by [`build`].
pub fn teardown(rootfs: &Path) -> OcirunResult<()> {
    if rootfs.exists() {
        std::fs::remove_dir_all(rootfs)?;
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};
    use tempfile::tempdir;

    use super::*;

    fn write_layer(dir: &Path, name: &str, files: &[(&str, &[u8])]) {
        let file = File::create(dir.join(name)).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test_log::test]
    fn test_build_overlays_layers_in_order() {
        let image_dir = tempdir().unwrap();
        write_layer(image_dir.path(), "layer_001_sha256_a.tar.gz", &[("a.txt", b"one")]);
        write_layer(image_dir.path(), "layer_002_sha256_b.tar.gz", &[("a.txt", b"two")]);

        let rootfs = build(image_dir.path()).unwrap();
        let contents = std::fs::read_to_string(rootfs.join("a.txt")).unwrap();
        assert_eq!(contents, "two");

        teardown(&rootfs).unwrap();
        assert!(!rootfs.exists());
    }

    #[test]
    fn test_build_fails_with_no_layers() {
        let image_dir = tempdir().unwrap();
        assert!(build(image_dir.path()).is_err());
    }

    #[test]
    fn test_build_rejects_path_escaping_entries() {
        let image_dir = tempdir().unwrap();
        write_layer(
            image_dir.path(),
            "layer_001_sha256_a.tar.gz",
            &[("../escaped.txt", b"evil"), ("safe.txt", b"ok")],
        );

        let rootfs = build(image_dir.path()).unwrap();
        assert!(rootfs.join("safe.txt").exists());
        assert!(!rootfs.parent().unwrap().join("escaped.txt").exists());

        teardown(&rootfs).unwrap();
    }
}
