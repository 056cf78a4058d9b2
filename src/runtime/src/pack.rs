//! Bundle archive workflows: pack to disk, push to and pull from a
//! registry, unpack into a directory.

use std::io::Write;
use std::path::{Path, PathBuf};

use kbundle_core::error::{BundleError, Result};
use kbundle_core::ImageRef;

use crate::archive;
use crate::bundle::Bundle;
use crate::oci::envelope;
use crate::oci::registry::{ImageReader, ImageWriter};
use crate::staging::{StagedBundle, StagingAssembler};

/// Options for [`pack_bundle`].
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Directory the archive is written to.
    pub output_dir: PathBuf,
    /// Replace an existing archive of the same name.
    pub force: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            force: false,
        }
    }
}

/// Stage `bundle` and write `<name>-<version>.tgz` into the output directory.
///
/// The archive is written to a temporary file and renamed into place, so a
/// failed pack never leaves a partial archive behind.
pub async fn pack_bundle(
    bundle: &Bundle,
    assembler: &StagingAssembler,
    options: &PackOptions,
) -> Result<PathBuf> {
    let target = options.output_dir.join(bundle.config().archive_file_name());
    if target.exists() && !options.force {
        return Err(BundleError::Collision {
            first: target.display().to_string(),
            second: format!("bundle {}", bundle.config().name()),
        });
    }

    let staging = assembler.assemble(bundle).await?;
    let bytes = archive::pack(staging.path())?;

    std::fs::create_dir_all(&options.output_dir).map_err(|e| {
        BundleError::io(format!("Failed to create {}", options.output_dir.display()), e)
    })?;
    let mut file = tempfile::NamedTempFile::new_in(&options.output_dir)
        .map_err(|e| BundleError::io("Failed to create temporary archive", e))?;
    file.write_all(&bytes)
        .map_err(|e| BundleError::io("Failed to write archive", e))?;
    file.persist(&target)
        .map_err(|e| BundleError::io(format!("Failed to write {}", target.display()), e.error))?;

    tracing::info!(
        archive = %target.display(),
        size = bytes.len(),
        "Packed bundle"
    );
    Ok(target)
}

/// Push an archive file as a single-layer image; returns the manifest URL.
pub async fn push_archive(
    archive_path: &Path,
    reference: &ImageRef,
    writer: &dyn ImageWriter,
) -> Result<String> {
    let bytes = std::fs::read(archive_path).map_err(|e| {
        BundleError::io(format!("Failed to read {}", archive_path.display()), e)
    })?;
    let image = envelope::wrap(&bytes)?;
    writer.write(reference, &image).await
}

/// Pull a bundle image and unpack its archive into `dest`.
pub async fn pull_archive(
    reference: &ImageRef,
    reader: &dyn ImageReader,
    dest: &Path,
) -> Result<()> {
    ensure_empty(dest)?;
    let image = reader.read(reference).await?;
    let tar_bytes = envelope::unwrap(&image)?;
    archive::unpack(&tar_bytes, dest)?;
    tracing::info!(reference = %reference, dest = %dest.display(), "Pulled bundle");
    Ok(())
}

/// Unpack an archive file into `dest` and read the bundle back.
pub fn unpack_archive(
    archive_path: &Path,
    dest: &Path,
    assembler: &StagingAssembler,
) -> Result<StagedBundle> {
    ensure_empty(dest)?;
    let bytes = std::fs::read(archive_path).map_err(|e| {
        BundleError::io(format!("Failed to read {}", archive_path.display()), e)
    })?;
    archive::unpack(&bytes, dest)?;
    let staged = assembler.disassemble(dest)?;
    tracing::info!(
        archive = %archive_path.display(),
        dest = %dest.display(),
        images = staged.layout_images.len(),
        "Unpacked bundle"
    );
    Ok(staged)
}

/// Refuse to unpack over existing content.
fn ensure_empty(dest: &Path) -> Result<()> {
    if !dest.exists() {
        return Ok(());
    }
    let mut entries = std::fs::read_dir(dest)
        .map_err(|e| BundleError::io(format!("Failed to read {}", dest.display()), e))?;
    if entries.next().is_some() {
        return Err(BundleError::Collision {
            first: dest.display().to_string(),
            second: "unpacked bundle".to_string(),
        });
    }
    Ok(())
}
