//! In-memory form of a registry image: manifest, config blob and layer blobs.

use std::collections::BTreeMap;

use kbundle_core::error::{BundleError, Result};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use serde_json::json;
use sha2::{Digest, Sha256};

/// OCI image manifest media type.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image config media type.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Gzip-compressed tar layer media type.
pub const LAYER_TAR_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Hex part of a `sha256:<hex>` digest.
///
/// Rejects other algorithms and anything that is not lowercase hex, so the
/// result is safe to use as a file name.
pub fn digest_hex(digest: &str) -> Result<&str> {
    let hex = digest
        .strip_prefix("sha256:")
        .ok_or_else(|| BundleError::Format(format!("unsupported digest '{}'", digest)))?;
    if hex.len() != 64 || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
        return Err(BundleError::Format(format!("malformed digest '{}'", digest)));
    }
    Ok(hex)
}

/// A blob destined to become one image layer.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    pub data: Vec<u8>,
    pub media_type: String,
    pub annotations: BTreeMap<String, String>,
}

impl LayerBlob {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// An image as read from or written to a registry.
///
/// `layers[i]` holds the blob described by `manifest.layers[i]`.
///
/// `manifest_raw` holds the manifest bytes as served by a registry or
/// layout; when present they are what gets digested and written.
#[derive(Debug, Clone)]
pub struct RegistryImage {
    pub manifest: OciImageManifest,
    pub manifest_raw: Option<Vec<u8>>,
    pub config: Vec<u8>,
    pub layers: Vec<Vec<u8>>,
}

impl RegistryImage {
    /// Build an image and its manifest from raw blobs.
    pub fn from_blobs(config: Vec<u8>, layers: Vec<LayerBlob>) -> Result<Self> {
        let layer_descriptors: Vec<serde_json::Value> = layers
            .iter()
            .map(|layer| {
                let mut descriptor = json!({
                    "mediaType": layer.media_type,
                    "digest": sha256_digest(&layer.data),
                    "size": layer.data.len(),
                });
                if !layer.annotations.is_empty() {
                    descriptor["annotations"] = json!(layer.annotations);
                }
                descriptor
            })
            .collect();

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST_MEDIA_TYPE,
            "config": {
                "mediaType": CONFIG_MEDIA_TYPE,
                "digest": sha256_digest(&config),
                "size": config.len(),
            },
            "layers": layer_descriptors,
        });
        let manifest: OciImageManifest = serde_json::from_value(manifest)?;

        Ok(Self {
            manifest,
            manifest_raw: None,
            config,
            layers: layers.into_iter().map(|layer| layer.data).collect(),
        })
    }

    /// Build an image around manifest bytes as served, keeping them verbatim.
    pub fn from_manifest_bytes(
        raw: Vec<u8>,
        config: Vec<u8>,
        layers: Vec<Vec<u8>>,
    ) -> Result<Self> {
        let manifest: OciImageManifest = serde_json::from_slice(&raw)
            .map_err(|e| BundleError::Format(format!("invalid image manifest: {}", e)))?;
        Ok(Self {
            manifest,
            manifest_raw: Some(raw),
            config,
            layers,
        })
    }

    /// Manifest bytes: the original ones when known, otherwise `manifest`
    /// serialized.
    pub fn manifest_bytes(&self) -> Result<Vec<u8>> {
        match &self.manifest_raw {
            Some(raw) => Ok(raw.clone()),
            None => Ok(serde_json::to_vec(&self.manifest)?),
        }
    }

    /// Media type of the manifest, defaulting to the OCI one.
    pub fn manifest_media_type(&self) -> &str {
        self.manifest
            .media_type
            .as_deref()
            .unwrap_or(MANIFEST_MEDIA_TYPE)
    }

    /// Digest of the serialized manifest.
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.manifest_bytes()?))
    }

    /// Config descriptor followed by the layer descriptors, each paired with
    /// its blob.
    pub fn blobs(&self) -> Result<Vec<(&OciDescriptor, &[u8])>> {
        if self.manifest.layers.len() != self.layers.len() {
            return Err(BundleError::Format(format!(
                "manifest lists {} layers but {} were provided",
                self.manifest.layers.len(),
                self.layers.len()
            )));
        }
        let mut blobs = vec![(&self.manifest.config, self.config.as_slice())];
        blobs.extend(
            self.manifest
                .layers
                .iter()
                .zip(self.layers.iter().map(Vec::as_slice)),
        );
        Ok(blobs)
    }

    /// Check every blob against its descriptor's digest.
    pub fn verify(&self) -> Result<()> {
        for (descriptor, data) in self.blobs()? {
            let actual = sha256_digest(data);
            if actual != descriptor.digest {
                return Err(BundleError::Format(format!(
                    "blob digest mismatch: expected {}, got {}",
                    descriptor.digest, actual
                )));
            }
        }
        Ok(())
    }
}
