//! Pushing a bundle's images to a new registry prefix.

use kbundle_core::error::{BundleError, Result};
use kbundle_core::{ImageRef, ImageSet};

use crate::flatten::flatten;
use crate::oci::layout::ImageLayout;

/// Where and how to relocate.
#[derive(Debug, Clone, Default)]
pub struct RelocateOptions {
    /// Target `registry/path` every image is flattened under.
    pub prefix: String,
    /// Compute the mapping without pushing.
    pub dry_run: bool,
}

/// One image moved to its relocated name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub original: ImageRef,
    pub relocated: ImageRef,
    /// Manifest digest pushed for the image.
    pub digest: String,
}

pub struct Relocator {
    options: RelocateOptions,
}

impl Relocator {
    pub fn new(options: RelocateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RelocateOptions {
        &self.options
    }

    /// Push every image in `images` from `layout` to its flattened name.
    ///
    /// All names and digests are resolved before the first push, so a
    /// missing image or a bad prefix fails without touching the target.
    /// Returns the mapping in image order.
    pub async fn relocate(
        &self,
        layout: &dyn ImageLayout,
        images: &ImageSet,
    ) -> Result<Vec<Relocation>> {
        let mut relocations = Vec::with_capacity(images.len());
        for image in images.iter() {
            let digest = layout.find(image)?.ok_or_else(|| {
                BundleError::NotFound(format!("image {} in bundle layout", image))
            })?;
            let relocated = flatten(&self.options.prefix, image)?;
            if let Some(pinned) = relocated.digest() {
                if pinned != digest {
                    return Err(BundleError::Format(format!(
                        "{} is pinned to {} but the bundle layout holds {}",
                        image, pinned, digest
                    )));
                }
            }
            relocations.push(Relocation {
                original: image.clone(),
                relocated,
                digest,
            });
        }

        for relocation in &relocations {
            if self.options.dry_run {
                tracing::info!(
                    from = %relocation.original,
                    to = %relocation.relocated,
                    "Would relocate image"
                );
                continue;
            }
            layout
                .push(&relocation.digest, &relocation.relocated)
                .await?;
            tracing::info!(
                from = %relocation.original,
                to = %relocation.relocated,
                digest = %relocation.digest,
                "Relocated image"
            );
        }

        Ok(relocations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::image::{sha256_digest, LayerBlob, RegistryImage, LAYER_TAR_GZIP_MEDIA_TYPE};
    use crate::oci::layout::OciLayout;
    use crate::oci::memory::MemoryRegistry;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Layout double that records pushes.
    #[derive(Default)]
    struct RecordingLayout {
        present: Vec<String>,
        pushed: Mutex<Vec<(String, String)>>,
        /// Zero-based index of the push that fails.
        fail_at: Option<usize>,
        attempts: Mutex<usize>,
    }

    impl RecordingLayout {
        fn with(references: &[&str]) -> Self {
            Self {
                present: references
                    .iter()
                    .map(|r| ImageRef::parse(r).unwrap().full_reference())
                    .collect(),
                ..Default::default()
            }
        }

        fn pushed(&self) -> Vec<(String, String)> {
            self.pushed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageLayout for RecordingLayout {
        async fn add(&mut self, reference: &ImageRef) -> Result<String> {
            self.present.push(reference.full_reference());
            Ok(format!("digest-of-{}", reference))
        }

        fn find(&self, reference: &ImageRef) -> Result<Option<String>> {
            let wanted = reference.full_reference();
            Ok(self
                .present
                .iter()
                .find(|r| **r == wanted)
                .map(|r| format!("digest-of-{}", r)))
        }

        async fn push(&self, digest: &str, target: &ImageRef) -> Result<()> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                *attempts += 1;
                *attempts - 1
            };
            if self.fail_at == Some(attempt) {
                return Err(BundleError::Registry {
                    registry: target.registry().to_string(),
                    message: "connection reset".to_string(),
                });
            }
            self.pushed
                .lock()
                .unwrap()
                .push((digest.to_string(), target.to_string()));
            Ok(())
        }
    }

    fn relocator(dry_run: bool) -> Relocator {
        Relocator::new(RelocateOptions {
            prefix: "example.com/mirror".to_string(),
            dry_run,
        })
    }

    #[tokio::test]
    async fn test_relocate_pushes_flattened_names() {
        let layout = RecordingLayout::with(&["gcr.io/project/foo:12345", "nginx:1.7.9"]);
        let images = ImageSet::new(["gcr.io/project/foo:12345", "nginx:1.7.9"]).unwrap();

        let relocations = relocator(false).relocate(&layout, &images).await.unwrap();
        assert_eq!(relocations.len(), 2);
        assert_eq!(
            relocations[0].original.to_string(),
            "docker.io/library/nginx:1.7.9"
        );
        assert_eq!(
            relocations[1].relocated.to_string(),
            "example.com/mirror/project-foo-ccb4875fd22f010124efaeb0d978e821:12345"
        );

        let pushed = layout.pushed();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[1].0, "digest-of-gcr.io/project/foo:12345");
        assert_eq!(pushed[1].1, relocations[1].relocated.to_string());
    }

    #[tokio::test]
    async fn test_dry_run_pushes_nothing() {
        let layout = RecordingLayout::with(&["redis:7"]);
        let images = ImageSet::new(["redis:7"]).unwrap();

        let relocations = relocator(true).relocate(&layout, &images).await.unwrap();
        assert_eq!(relocations.len(), 1);
        assert!(layout.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_aborts_before_pushing() {
        let layout = RecordingLayout::with(&["redis:7"]);
        let images = ImageSet::new(["redis:7", "zzz.io/missing:1"]).unwrap();

        let err = relocator(false).relocate(&layout, &images).await.unwrap_err();
        assert!(matches!(err, BundleError::NotFound(_)));
        assert!(layout.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_stops_relocation() {
        let mut layout = RecordingLayout::with(&["alpine:3", "nginx:1.7.9", "redis:7"]);
        layout.fail_at = Some(1);
        let images = ImageSet::new(["alpine:3", "nginx:1.7.9", "redis:7"]).unwrap();

        let err = relocator(false).relocate(&layout, &images).await.unwrap_err();
        assert!(matches!(err, BundleError::Registry { .. }));

        // The push before the failure stays; nothing after it is attempted.
        let pushed = layout.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "digest-of-docker.io/library/alpine:3");
        assert_eq!(*layout.attempts.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_relocate_digest_pinned_image() {
        // Manifest bytes as a registry might serve them, not in serde's
        // compact form.
        let built = RegistryImage::from_blobs(
            b"{\"os\":\"linux\"}".to_vec(),
            vec![LayerBlob::new(b"layer".to_vec(), LAYER_TAR_GZIP_MEDIA_TYPE)],
        )
        .unwrap();
        let raw = serde_json::to_vec_pretty(&built.manifest).unwrap();
        let digest = sha256_digest(&raw);
        let served = RegistryImage::from_manifest_bytes(raw, built.config, built.layers).unwrap();

        let source = ImageRef::parse(&format!("gcr.io/a/b@{}", digest)).unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(&source, served);

        let dir = TempDir::new().unwrap();
        let mut layout = OciLayout::create(dir.path(), registry.clone()).unwrap();
        assert_eq!(layout.add(&source).await.unwrap(), digest);

        let images = ImageSet::new([source.to_string()]).unwrap();
        let relocations = relocator(false).relocate(&layout, &images).await.unwrap();
        let relocated = &relocations[0].relocated;
        assert_eq!(relocated.digest(), Some(digest.as_str()));

        let pushed = registry.get(relocated).unwrap();
        assert_eq!(pushed.digest().unwrap(), digest);
    }

    #[tokio::test]
    async fn test_empty_set() {
        let layout = RecordingLayout::default();
        let relocations = relocator(false)
            .relocate(&layout, &ImageSet::empty())
            .await
            .unwrap();
        assert!(relocations.is_empty());
    }
}
