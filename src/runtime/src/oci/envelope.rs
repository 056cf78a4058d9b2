//! Bundle archives as single-layer OCI images.
//!
//! The archive is stored verbatim as the only layer, so wrapping the same
//! archive twice yields the same manifest digest.

use std::io::Read;

use flate2::read::GzDecoder;
use kbundle_core::error::{BundleError, Result};
use serde_json::json;

use super::image::{sha256_digest, LayerBlob, RegistryImage, LAYER_TAR_GZIP_MEDIA_TYPE};

/// Author recorded in the image config and layer annotations.
pub const AUTHOR: &str = "kbundle";

/// Layer annotation naming the image author.
pub const AUTHORS_ANNOTATION: &str = "org.opencontainers.image.authors";

// Fixed so the config, and with it the manifest digest, is reproducible.
const EPOCH: &str = "1970-01-01T00:00:00Z";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Wrap a gzip-compressed bundle archive as an image.
pub fn wrap(archive: &[u8]) -> Result<RegistryImage> {
    if !archive.starts_with(&GZIP_MAGIC) {
        return Err(BundleError::Format(
            "bundle archive is not gzip-compressed".to_string(),
        ));
    }
    let diff_id = sha256_digest(&decompress(archive)?);

    let config = json!({
        "architecture": "amd64",
        "os": "linux",
        "author": AUTHOR,
        "created": EPOCH,
        "config": {},
        "rootfs": {
            "type": "layers",
            "diff_ids": [diff_id],
        },
        "history": [{
            "created": EPOCH,
            "author": AUTHOR,
            "created_by": "kbundle push",
            "comment": "bundle archive",
        }],
    });

    let layer = LayerBlob::new(archive.to_vec(), LAYER_TAR_GZIP_MEDIA_TYPE)
        .with_annotation(AUTHORS_ANNOTATION, AUTHOR);
    RegistryImage::from_blobs(serde_json::to_vec(&config)?, vec![layer])
}

/// Extract the bundle archive from an image, as uncompressed tar bytes.
pub fn unwrap(image: &RegistryImage) -> Result<Vec<u8>> {
    if image.layers.len() != 1 || image.manifest.layers.len() != 1 {
        return Err(BundleError::Format(format!(
            "bundle image must have exactly 1 layer, found {}",
            image.manifest.layers.len().max(image.layers.len())
        )));
    }
    image.verify()?;

    let layer = &image.layers[0];
    if layer.starts_with(&GZIP_MAGIC) {
        decompress(layer)
    } else {
        Ok(layer.clone())
    }
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| BundleError::Format(format!("corrupt gzip stream: {}", e)))?;
    Ok(out)
}
