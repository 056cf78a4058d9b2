//! Manifest documents as read from disk.

use std::path::Path;

use kbundle_core::error::{BundleError, Result};

/// One manifest file: its source identifier and raw YAML bytes.
///
/// A file may hold several `---`-separated YAML documents; they are scanned
/// together as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    id: String,
    raw: Vec<u8>,
}

impl ManifestDocument {
    pub fn new(id: impl Into<String>, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            raw: raw.into(),
        }
    }

    /// Read a manifest file; its path becomes the document ID.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            BundleError::io(format!("Failed to read manifest {}", path.display()), e)
        })?;
        Ok(Self::new(path.display().to_string(), raw))
    }

    /// Source identifier (usually the file path).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Final path component of the ID, used as the staged file name.
    pub fn basename(&self) -> Result<String> {
        Path::new(&self.id)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                BundleError::Validation(format!("manifest '{}' has no file name", self.id))
            })
    }
}

/// Whether a path looks like a YAML manifest.
pub fn is_manifest_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
