//! OCI image handling.
//!
//! Registry access, the on-disk image layout used inside bundles, and the
//! single-layer envelope that carries a bundle archive through a registry.

pub mod envelope;
pub mod image;
pub mod layout;
pub mod memory;
pub mod registry;

pub use image::{LayerBlob, RegistryImage};
pub use layout::{ImageLayout, OciLayout};
pub use memory::MemoryRegistry;
pub use registry::{ImageReader, ImageWriter, Registry, RegistryAuth, RegistryClient, RegistryConfig};
