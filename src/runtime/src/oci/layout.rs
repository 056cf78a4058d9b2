//! On-disk OCI image layout (`oci-layout`, `index.json`, `blobs/sha256/`).
//!
//! Index entries are annotated with the canonical reference of the image
//! they were fetched for, which is how [`ImageLayout::find`] resolves them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kbundle_core::error::{BundleError, Result};
use kbundle_core::ImageRef;
use oci_distribution::manifest::OciImageManifest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::image::{digest_hex, sha256_digest, RegistryImage};
use super::registry::Registry;

/// Annotation holding an index entry's image reference.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Image store addressed by image reference.
#[async_trait]
pub trait ImageLayout: Send + Sync {
    /// Fetch `reference` into the layout unless already present; returns
    /// the manifest digest.
    async fn add(&mut self, reference: &ImageRef) -> Result<String>;

    /// Manifest digest recorded for `reference`, if any.
    fn find(&self, reference: &ImageRef) -> Result<Option<String>>;

    /// Upload the image with manifest `digest` to `target`.
    async fn push(&self, digest: &str, target: &ImageRef) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    media_type: String,
    digest: String,
    size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
}

impl IndexEntry {
    fn reference(&self) -> Option<&str> {
        self.annotations.get(REF_NAME_ANNOTATION).map(String::as_str)
    }
}

/// OCI image layout directory backed by a registry for fetches and pushes.
pub struct OciLayout {
    root: PathBuf,
    index: LayoutIndex,
    registry: Arc<dyn Registry>,
}

impl OciLayout {
    /// Create a layout at `root`, or open the one already there.
    pub fn create(root: &Path, registry: Arc<dyn Registry>) -> Result<Self> {
        if root.join(INDEX_FILE).exists() {
            return Self::open(root, registry);
        }

        let blobs_dir = root.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir).map_err(|e| {
            BundleError::io(format!("Failed to create {}", blobs_dir.display()), e)
        })?;
        write_file(&root.join(OCI_LAYOUT_FILE), OCI_LAYOUT_CONTENT.as_bytes())?;

        let layout = Self {
            root: root.to_path_buf(),
            index: LayoutIndex {
                schema_version: 2,
                ..Default::default()
            },
            registry,
        };
        layout.save_index()?;

        tracing::debug!(root = %root.display(), "Created OCI layout");
        Ok(layout)
    }

    /// Open an existing layout.
    pub fn open(root: &Path, registry: Arc<dyn Registry>) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            index: load_index(root)?,
            registry,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// References recorded in the index, in index order.
    pub fn references(&self) -> Vec<String> {
        self.index
            .manifests
            .iter()
            .filter_map(|entry| entry.reference().map(str::to_string))
            .collect()
    }

    /// Assemble the image whose manifest has `digest` from local blobs.
    pub fn read_image(&self, digest: &str) -> Result<RegistryImage> {
        let raw = self.read_blob(digest)?;
        let manifest: OciImageManifest = serde_json::from_slice(&raw)
            .map_err(|e| BundleError::Format(format!("manifest {}: {}", digest, e)))?;
        let config = self.read_blob(&manifest.config.digest)?;
        let layers = manifest
            .layers
            .iter()
            .map(|layer| self.read_blob(&layer.digest))
            .collect::<Result<Vec<_>>>()?;

        RegistryImage::from_manifest_bytes(raw, config, layers)
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("blobs")
            .join("sha256")
            .join(digest_hex(digest)?))
    }

    fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        let data = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BundleError::NotFound(format!("blob {} in {}", digest, self.root.display()))
            } else {
                BundleError::io(format!("Failed to read {}", path.display()), e)
            }
        })?;

        let actual = sha256_digest(&data);
        if actual != digest {
            return Err(BundleError::Format(format!(
                "blob {} is corrupt (content digest {})",
                digest, actual
            )));
        }
        Ok(data)
    }

    /// Write `data` as a blob; returns its digest.
    fn write_blob(&self, data: &[u8]) -> Result<String> {
        let digest = sha256_digest(data);
        let path = self.blob_path(&digest)?;
        if !path.exists() {
            write_file(&path, data)?;
        }
        Ok(digest)
    }

    fn save_index(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.index)?;
        write_file(&self.root.join(INDEX_FILE), &data)
    }
}

#[async_trait]
impl ImageLayout for OciLayout {
    async fn add(&mut self, reference: &ImageRef) -> Result<String> {
        if let Some(digest) = self.find(reference)? {
            tracing::debug!(reference = %reference, %digest, "Image already in layout");
            return Ok(digest);
        }

        let image = self.registry.read(reference).await?;
        image.verify()?;

        // A pinned reference must name the manifest that gets stored.
        let manifest = image.manifest_bytes()?;
        let actual = sha256_digest(&manifest);
        if let Some(pinned) = reference.digest() {
            if pinned != actual {
                return Err(BundleError::Format(format!(
                    "{} resolved to manifest {}; pin the platform manifest digest instead",
                    reference, actual
                )));
            }
        }

        for (_, data) in image.blobs()? {
            self.write_blob(data)?;
        }
        let digest = self.write_blob(&manifest)?;

        let mut annotations = BTreeMap::new();
        annotations.insert(REF_NAME_ANNOTATION.to_string(), reference.full_reference());
        self.index.manifests.push(IndexEntry {
            media_type: image.manifest_media_type().to_string(),
            digest: digest.clone(),
            size: manifest.len() as u64,
            annotations,
        });
        self.save_index()?;

        tracing::info!(reference = %reference, %digest, "Added image to layout");
        Ok(digest)
    }

    fn find(&self, reference: &ImageRef) -> Result<Option<String>> {
        let wanted = reference.full_reference();
        Ok(self
            .index
            .manifests
            .iter()
            .find(|entry| entry.reference() == Some(wanted.as_str()))
            .map(|entry| entry.digest.clone()))
    }

    async fn push(&self, digest: &str, target: &ImageRef) -> Result<()> {
        let image = self.read_image(digest)?;
        self.registry.write(target, &image).await?;
        tracing::info!(%digest, target = %target, "Pushed image from layout");
        Ok(())
    }
}

/// References recorded in the layout index at `root`.
pub fn read_references(root: &Path) -> Result<Vec<String>> {
    Ok(load_index(root)?
        .manifests
        .iter()
        .filter_map(|entry| entry.reference().map(str::to_string))
        .collect())
}

fn load_index(root: &Path) -> Result<LayoutIndex> {
    let path = root.join(INDEX_FILE);
    if !root.join(OCI_LAYOUT_FILE).exists() || !path.exists() {
        return Err(BundleError::NotFound(format!(
            "OCI layout at {}",
            root.display()
        )));
    }
    let data = std::fs::read(&path)
        .map_err(|e| BundleError::io(format!("Failed to read {}", path.display()), e))?;
    serde_json::from_slice(&data)
        .map_err(|e| BundleError::Format(format!("{}: {}", path.display(), e)))
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data)
        .map_err(|e| BundleError::io(format!("Failed to write {}", path.display()), e))
}
