//! Gzip-compressed tar archives of staging directories.
//!
//! Packing walks the staging tree in sorted order so equal trees produce
//! equal entry lists. Unpacking checks every entry before writing anything:
//! an archive with one bad entry leaves the destination untouched.

use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use kbundle_core::error::{BundleError, Result};
use tar::{Archive, Builder, EntryType};
use walkdir::WalkDir;

/// Permissions of directories created while unpacking.
pub const DIR_MODE: u32 = 0o750;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Pack the contents of `staging` into a tar+gzip byte stream.
///
/// Entry names are relative to `staging` and use `/` separators.
pub fn pack(staging: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in WalkDir::new(staging).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            BundleError::Other(format!("Failed to walk {}: {}", staging.display(), e))
        })?;
        let relative = entry.path().strip_prefix(staging).map_err(|e| {
            BundleError::Other(format!("{}: {}", entry.path().display(), e))
        })?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let file_type = entry.file_type();
        let appended = if file_type.is_dir() {
            builder.append_dir(&name, entry.path())
        } else if file_type.is_file() {
            builder.append_path_with_name(entry.path(), &name)
        } else {
            return Err(BundleError::Format(format!(
                "unsupported file type at {}",
                entry.path().display()
            )));
        };
        appended.map_err(|e| BundleError::io(format!("Failed to archive {}", name), e))?;

        tracing::trace!(entry = %name, "Archived");
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| BundleError::io("Failed to finish archive", e))?;
    encoder
        .finish()
        .map_err(|e| BundleError::io("Failed to compress archive", e))
}

/// Unpack a tar stream, gzip-compressed or not, into `dest`.
///
/// Fails with a format error if any entry name is absolute, contains a `..`
/// component or a backslash, or if any entry is neither a regular file nor a
/// directory. Nothing is written in that case.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    let tar_bytes = decompress(data)?;

    let count = validate(&tar_bytes)?;
    tracing::debug!(entries = count, dest = %dest.display(), "Archive validated");

    create_dir(dest)?;
    let mut archive = Archive::new(&tar_bytes[..]);
    for entry in entries(&mut archive)? {
        let mut entry = entry?;
        let name = entry_name(&entry);
        let target = dest.join(name.trim_end_matches('/'));

        if entry.header().entry_type() == EntryType::Directory {
            create_dir(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        {
            let mut file = std::fs::File::create(&target).map_err(|e| {
                BundleError::io(format!("Failed to create {}", target.display()), e)
            })?;
            std::io::copy(&mut entry, &mut file).map_err(|e| {
                BundleError::io(format!("Failed to extract {}", name), e)
            })?;
            file.flush()
                .map_err(|e| BundleError::io(format!("Failed to write {}", target.display()), e))?;
        }
        set_mode(&target, entry.header().mode().unwrap_or(0o644) & 0o777)?;
    }

    Ok(())
}

/// Reject entry names that could escape the extraction root.
pub fn validate_entry_name(name: &str) -> Result<()> {
    let bad = |reason: &str| {
        Err(BundleError::Format(format!(
            "illegal archive entry '{}': {}",
            name, reason
        )))
    };

    if name.is_empty() {
        return bad("empty name");
    }
    if name.starts_with('/') {
        return bad("absolute path");
    }
    if name.contains('\\') {
        return bad("backslash in path");
    }
    if name.split('/').any(|component| component == "..") {
        return bad("path traversal");
    }
    Ok(())
}

fn decompress(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(data));
    }
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| BundleError::Format(format!("corrupt gzip stream: {}", e)))?;
    Ok(Cow::Owned(out))
}

/// Check every entry; returns the entry count.
fn validate(tar_bytes: &[u8]) -> Result<usize> {
    let mut archive = Archive::new(tar_bytes);
    let mut count = 0;
    for entry in entries(&mut archive)? {
        let entry = entry?;
        let name = entry_name(&entry);
        validate_entry_name(&name)?;
        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Directory => {}
            other => {
                return Err(BundleError::Format(format!(
                    "illegal archive entry '{}': unsupported type {:?}",
                    name, other
                )))
            }
        }
        count += 1;
    }
    Ok(count)
}

fn entries<'a, R: Read + 'a>(
    archive: &'a mut Archive<R>,
) -> Result<impl Iterator<Item = Result<tar::Entry<'a, R>>>> {
    let entries = archive
        .entries()
        .map_err(|e| BundleError::Format(format!("corrupt tar stream: {}", e)))?;
    Ok(entries.map(|entry| {
        entry.map_err(|e| BundleError::Format(format!("corrupt tar entry: {}", e)))
    }))
}

fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> String {
    String::from_utf8_lossy(&entry.path_bytes()).into_owned()
}

fn create_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
        .map_err(|e| BundleError::io(format!("Failed to create {}", path.display()), e))?;
    set_mode(path, DIR_MODE)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| BundleError::io(format!("Failed to set mode on {}", path.display()), e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn staging_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bundle.json"), b"{\"name\":\"app\"}").unwrap();
        fs::create_dir_all(dir.path().join("app/manifests")).unwrap();
        fs::write(dir.path().join("app/manifests/deploy.yaml"), b"kind: Pod\n").unwrap();
        fs::create_dir_all(dir.path().join("artifacts/layout/blobs/sha256")).unwrap();
        fs::write(dir.path().join("artifacts/layout/index.json"), b"{}").unwrap();
        dir
    }

    /// Tar with raw entry names, bypassing the builder's path checks.
    fn raw_tar(entries: &[(&str, EntryType, &str)]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, kind, data) in entries {
            let mut header = tar::Header::new_gnu();
            let bytes = name.as_bytes();
            header.as_old_mut().name[..bytes.len()].copy_from_slice(bytes);
            header.set_entry_type(*kind);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append(&header, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let tar_bytes = decompress(archive).unwrap().into_owned();
        let mut archive = Archive::new(tar_bytes.as_slice());
        archive
            .entries()
            .unwrap()
            .map(|e| entry_name(&e.unwrap()).trim_end_matches('/').to_string())
            .collect()
    }

    #[test]
    fn test_pack_sorted_relative_entries() {
        let dir = staging_tree();
        let archive = pack(dir.path()).unwrap();
        assert!(archive.starts_with(&GZIP_MAGIC));
        assert_eq!(
            entry_names(&archive),
            vec![
                "app",
                "app/manifests",
                "app/manifests/deploy.yaml",
                "artifacts",
                "artifacts/layout",
                "artifacts/layout/blobs",
                "artifacts/layout/blobs/sha256",
                "artifacts/layout/index.json",
                "bundle.json",
            ]
        );
    }

    #[test]
    fn test_pack_then_unpack() {
        let dir = staging_tree();
        let archive = pack(dir.path()).unwrap();

        let out = TempDir::new().unwrap();
        let dest = out.path().join("unpacked");
        unpack(&archive, &dest).unwrap();

        assert_eq!(
            fs::read(dest.join("app/manifests/deploy.yaml")).unwrap(),
            b"kind: Pod\n"
        );
        assert!(dest.join("artifacts/layout/blobs/sha256").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = staging_tree();
        let script = dir.path().join("app/run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let out = TempDir::new().unwrap();
        unpack(&pack(dir.path()).unwrap(), out.path()).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&out.path().join("app")), DIR_MODE);
        assert_eq!(mode(&out.path().join("app/run.sh")), 0o755);
    }

    #[test]
    fn test_unpack_plain_tar() {
        let data = raw_tar(&[("hello.txt", EntryType::Regular, "hi")]);
        let out = TempDir::new().unwrap();
        unpack(&data, out.path()).unwrap();
        assert_eq!(fs::read(out.path().join("hello.txt")).unwrap(), b"hi");
    }

    #[test]
    fn test_unpack_rejects_traversal_without_writing() {
        for bad in ["../evil", "a/../../evil", "a/..", "/etc/passwd", "a\\b"] {
            let data = raw_tar(&[
                ("ok.txt", EntryType::Regular, "fine"),
                (bad, EntryType::Regular, "evil"),
            ]);
            let out = TempDir::new().unwrap();
            let dest = out.path().join("dest");

            let err = unpack(&data, &dest).unwrap_err();
            assert!(matches!(err, BundleError::Format(_)), "{bad}: {err}");
            assert!(!dest.exists(), "{bad} wrote to the destination");
        }
    }

    #[test]
    fn test_unpack_rejects_links() {
        let data = raw_tar(&[("link", EntryType::Symlink, "")]);
        let out = TempDir::new().unwrap();
        assert!(matches!(
            unpack(&data, &out.path().join("dest")),
            Err(BundleError::Format(_))
        ));
    }

    #[test]
    fn test_validate_entry_name() {
        assert!(validate_entry_name("bundle.json").is_ok());
        assert!(validate_entry_name("app/manifests/").is_ok());
        assert!(validate_entry_name("a/..b/c").is_ok());
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("..").is_err());
    }
}
