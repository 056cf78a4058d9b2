//! Staging directories: the on-disk shape of a bundle archive.
//!
//! ```text
//! <staging>/
//!   bundle.json
//!   app/manifests/<basename>...
//!   artifacts/layout/          OCI image layout with every bundle image
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kbundle_core::config::BundleConfig;
use kbundle_core::error::{BundleError, Result};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::bundle::{Bundle, LAYOUT_DIR};
use crate::manifest::{is_manifest_path, ManifestDocument};
use crate::oci::layout::{read_references, ImageLayout, OciLayout};
use crate::oci::registry::Registry;
use crate::scan::ManifestScanner;

/// Manifest location relative to a staging root.
pub const MANIFESTS_DIR: &str = "app/manifests";

/// Temporary staging directory, removed on drop.
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout_path(&self) -> PathBuf {
        self.path().join(LAYOUT_DIR)
    }
}

/// A bundle read back from a staging directory.
#[derive(Debug, Clone)]
pub struct StagedBundle {
    pub bundle: Bundle,
    /// References recorded in the staged image layout.
    pub layout_images: Vec<String>,
}

/// Builds staging directories from bundles and reads them back.
pub struct StagingAssembler {
    scanner: Arc<ManifestScanner>,
    registry: Arc<dyn Registry>,
}

impl StagingAssembler {
    pub fn new(scanner: Arc<ManifestScanner>, registry: Arc<dyn Registry>) -> Self {
        Self { scanner, registry }
    }

    pub fn scanner(&self) -> &ManifestScanner {
        &self.scanner
    }

    /// Stage `bundle` into a fresh temporary directory.
    ///
    /// Manifests are copied flat into `app/manifests`, so two manifests with
    /// the same file name are a collision; this is checked before any image
    /// is fetched. Images already in the bundle's own layout (an unpacked
    /// bundle being re-packed) are reused.
    pub async fn assemble(&self, bundle: &Bundle) -> Result<StagingDir> {
        let images = bundle.images(&self.scanner)?;

        let dir = tempfile::Builder::new()
            .prefix("kbundle-staging-")
            .tempdir()
            .map_err(|e| BundleError::io("Failed to create staging directory", e))?;
        let staging = StagingDir { dir };

        bundle.config().save(staging.path())?;
        stage_manifests(bundle.manifests(), &staging.path().join(MANIFESTS_DIR))?;

        let layout_dir = staging.layout_path();
        let existing = bundle.layout_path();
        if existing.join("index.json").is_file() {
            tracing::debug!(source = %existing.display(), "Reusing bundle image layout");
            copy_dir_recursive(&existing, &layout_dir)
                .map_err(|e| BundleError::io(format!("Failed to copy {}", existing.display()), e))?;
        } else {
            std::fs::create_dir_all(&layout_dir).map_err(|e| {
                BundleError::io(format!("Failed to create {}", layout_dir.display()), e)
            })?;
        }

        let mut layout = OciLayout::create(&layout_dir, self.registry.clone())?;
        for image in images.iter() {
            layout.add(image).await?;
        }

        tracing::info!(
            bundle = bundle.config().name(),
            images = images.len(),
            manifests = bundle.manifests().len(),
            staging = %staging.path().display(),
            "Assembled staging directory"
        );
        Ok(staging)
    }

    /// Read a staging directory back into a bundle rooted there.
    pub fn disassemble(&self, staging: &Path) -> Result<StagedBundle> {
        let config = BundleConfig::load(staging, self.scanner.engine())?;

        let manifests_dir = staging.join(MANIFESTS_DIR);
        let mut manifests = Vec::new();
        if manifests_dir.is_dir() {
            let mut paths = std::fs::read_dir(&manifests_dir)
                .map_err(|e| {
                    BundleError::io(format!("Failed to read {}", manifests_dir.display()), e)
                })?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()
                .map_err(|e| {
                    BundleError::io(format!("Failed to read {}", manifests_dir.display()), e)
                })?;
            paths.sort();
            for path in paths.iter().filter(|p| p.is_file() && is_manifest_path(p)) {
                let raw = std::fs::read(path).map_err(|e| {
                    BundleError::io(format!("Failed to read manifest {}", path.display()), e)
                })?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                manifests.push(ManifestDocument::new(format!("{}/{}", MANIFESTS_DIR, name), raw));
            }
        }

        let layout_dir = staging.join(LAYOUT_DIR);
        let layout_images = if layout_dir.exists() {
            read_references(&layout_dir)?
        } else {
            Vec::new()
        };

        Ok(StagedBundle {
            bundle: Bundle::new(staging, config, manifests),
            layout_images,
        })
    }
}

fn stage_manifests(manifests: &[ManifestDocument], dest: &Path) -> Result<()> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for manifest in manifests {
        let basename = manifest.basename()?;
        if let Some(first) = seen.insert(basename, manifest.id()) {
            return Err(BundleError::Collision {
                first: first.to_string(),
                second: manifest.id().to_string(),
            });
        }
    }

    std::fs::create_dir_all(dest)
        .map_err(|e| BundleError::io(format!("Failed to create {}", dest.display()), e))?;
    for manifest in manifests {
        let path = dest.join(manifest.basename()?);
        std::fs::write(&path, manifest.raw())
            .map_err(|e| BundleError::io(format!("Failed to write {}", path.display()), e))?;
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
