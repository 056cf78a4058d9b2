//! Registry held in process memory.
//!
//! Stands in for the remote registry during `relocate --dry-run`, where
//! nothing may be fetched or pushed, and in tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kbundle_core::error::{BundleError, Result};
use kbundle_core::ImageRef;

use super::image::RegistryImage;
use super::registry::{ImageReader, ImageWriter};

/// Images keyed by canonical reference.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    images: Mutex<BTreeMap<String, RegistryImage>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `image` under `reference`.
    pub fn insert(&self, reference: &ImageRef, image: RegistryImage) {
        self.lock().insert(reference.full_reference(), image);
    }

    pub fn get(&self, reference: &ImageRef) -> Option<RegistryImage> {
        self.lock().get(&reference.full_reference()).cloned()
    }

    /// Canonical references of every stored image, sorted.
    pub fn references(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, RegistryImage>> {
        // A poisoned map is still consistent: every mutation is a single insert.
        self.images.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ImageReader for MemoryRegistry {
    async fn read(&self, reference: &ImageRef) -> Result<RegistryImage> {
        self.get(reference)
            .ok_or_else(|| BundleError::NotFound(format!("image {}", reference)))
    }
}

#[async_trait]
impl ImageWriter for MemoryRegistry {
    async fn write(&self, reference: &ImageRef, image: &RegistryImage) -> Result<String> {
        image.verify()?;
        if let Some(pinned) = reference.digest() {
            let actual = image.digest()?;
            if pinned != actual {
                return Err(BundleError::Registry {
                    registry: reference.registry().to_string(),
                    message: format!("manifest digest {} does not match {}", actual, pinned),
                });
            }
        }
        self.insert(reference, image.clone());
        Ok(format!("memory://{}", reference.full_reference()))
    }
}
