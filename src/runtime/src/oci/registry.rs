//! OCI registry client for reading and writing images.
//!
//! Uses the `oci-distribution` crate to interact with container registries
//! (Docker Hub, GHCR, private registries).

use async_trait::async_trait;
use kbundle_core::error::{BundleError, Result};
use kbundle_core::ImageRef;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    ImageIndexEntry, IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::image::{sha256_digest, RegistryImage};

/// Reads images from a registry.
#[async_trait]
pub trait ImageReader: Send + Sync {
    /// Fetch the manifest, config and layers of `reference`.
    async fn read(&self, reference: &ImageRef) -> Result<RegistryImage>;
}

/// Writes images to a registry.
#[async_trait]
pub trait ImageWriter: Send + Sync {
    /// Upload `image` under `reference`, returning the manifest URL.
    async fn write(&self, reference: &ImageRef, image: &RegistryImage) -> Result<String>;
}

/// A registry that can be both read and written.
pub trait Registry: ImageReader + ImageWriter {}

impl<T: ImageReader + ImageWriter> Registry for T {}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`.
    ///
    /// Falls back to anonymous unless both are set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Connection settings for [`RegistryClient`].
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Talk plain HTTP instead of HTTPS.
    pub insecure: bool,
    pub auth: RegistryAuth,
}

impl RegistryConfig {
    /// Credentials from the environment, HTTPS unless `insecure`.
    pub fn from_env(insecure: bool) -> Self {
        Self {
            insecure,
            auth: RegistryAuth::from_env(),
        }
    }
}

/// Reads and writes images on remote registries.
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Self {
        let protocol = if config.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let client = Client::new(ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        });
        Self {
            client,
            auth: config.auth,
        }
    }

    fn registry_error(reference: &ImageRef, message: String) -> BundleError {
        BundleError::Registry {
            registry: reference.registry().to_string(),
            message,
        }
    }
}

#[async_trait]
impl ImageReader for RegistryClient {
    async fn read(&self, reference: &ImageRef) -> Result<RegistryImage> {
        let oci_ref = to_pull_reference(reference)?;
        let auth = self.auth.to_oci_auth();

        tracing::info!(reference = %reference, "Pulling image from registry");

        // Resolves multi-arch indexes to a linux manifest.
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| {
                Self::registry_error(reference, format!("Failed to pull manifest: {}", e))
            })?;

        let by_digest = Reference::with_digest(
            oci_ref.registry().to_string(),
            oci_ref.repository().to_string(),
            manifest_digest.clone(),
        );
        let (raw, _) = self
            .client
            .pull_manifest_raw(
                &by_digest,
                &auth,
                &[OCI_IMAGE_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE],
            )
            .await
            .map_err(|e| {
                Self::registry_error(reference, format!("Failed to pull manifest: {}", e))
            })?;
        let actual = sha256_digest(&raw);
        if actual != manifest_digest {
            return Err(Self::registry_error(
                reference,
                format!(
                    "manifest digest mismatch: expected {}, got {}",
                    manifest_digest, actual
                ),
            ));
        }

        let mut config = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config)
            .await
            .map_err(|e| {
                Self::registry_error(reference, format!("Failed to pull config blob: {}", e))
            })?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");

            let mut data = Vec::new();
            self.client
                .pull_blob(&oci_ref, layer, &mut data)
                .await
                .map_err(|e| {
                    Self::registry_error(
                        reference,
                        format!("Failed to pull layer {}: {}", layer.digest, e),
                    )
                })?;
            layers.push(data);
        }

        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            layers = layers.len(),
            "Image pulled"
        );

        RegistryImage::from_manifest_bytes(raw, config, layers)
    }
}

#[async_trait]
impl ImageWriter for RegistryClient {
    async fn write(&self, reference: &ImageRef, image: &RegistryImage) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth.to_oci_auth();

        tracing::info!(reference = %reference, "Pushing image to registry");

        self.client
            .auth(&oci_ref, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| {
                Self::registry_error(reference, format!("Failed to authenticate: {}", e))
            })?;

        for (descriptor, data) in image.blobs()? {
            tracing::debug!(digest = %descriptor.digest, size = data.len(), "Pushing blob");
            self.client
                .push_blob(&oci_ref, data, &descriptor.digest)
                .await
                .map_err(|e| {
                    Self::registry_error(
                        reference,
                        format!("Failed to push blob {}: {}", descriptor.digest, e),
                    )
                })?;
        }

        // Pushed verbatim so the manifest keeps its digest.
        let media_type = image.manifest_media_type();
        let manifest_url = self
            .client
            .push_manifest_raw(
                &oci_ref,
                image.manifest_bytes()?,
                media_type.parse().map_err(|_| {
                    BundleError::Format(format!("invalid manifest media type '{}'", media_type))
                })?,
            )
            .await
            .map_err(|e| {
                Self::registry_error(reference, format!("Failed to push manifest: {}", e))
            })?;

        tracing::info!(
            reference = %reference,
            %manifest_url,
            "Image pushed"
        );

        Ok(manifest_url)
    }
}

/// Convert an ImageRef to an oci-distribution Reference.
///
/// A tag wins over a digest so pushes land on the tag; digest-only
/// references address the manifest directly.
fn to_oci_reference(reference: &ImageRef) -> Result<Reference> {
    let name = reference.name();
    let ref_str = match (reference.tag(), reference.digest()) {
        (Some(tag), _) => format!("{}:{}", name, tag),
        (None, Some(digest)) => format!("{}@{}", name, digest),
        (None, None) => format!("{}:{}", name, kbundle_core::reference::DEFAULT_TAG),
    };

    ref_str.parse::<Reference>().map_err(|e| {
        BundleError::parse(&ref_str, "registry reference", e.to_string())
    })
}

/// Like [`to_oci_reference`], but a digest wins so pinned images are pulled
/// by content.
fn to_pull_reference(reference: &ImageRef) -> Result<Reference> {
    match reference.digest() {
        Some(digest) => {
            let ref_str = format!("{}@{}", reference.name(), digest);
            ref_str.parse::<Reference>().map_err(|e| {
                BundleError::parse(&ref_str, "registry reference", e.to_string())
            })
        }
        None => to_oci_reference(reference),
    }
}

/// Selects the linux manifest matching the host architecture.
///
/// Workloads in a bundle run on Kubernetes nodes, which are linux.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .or_else(|| {
            manifests.iter().find(|entry| {
                entry.platform.as_ref().map_or(false, |p| p.os == "linux")
            })
        })
        .map(|entry| entry.digest.clone())
}
