//! kbundle Runtime - bundle engine.
//!
//! Manifest scanning, staging, archive codec, OCI layout and registry
//! access, and relocation of bundle images to a private registry.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod bundle;
pub mod flatten;
pub mod manifest;
pub mod oci;
pub mod pack;
pub mod relocate;
pub mod rewrite;
pub mod scan;
pub mod staging;

// Re-export common types
pub use bundle::{Bundle, LAYOUT_DIR};
pub use flatten::{flatten, MAX_NAME_LENGTH};
pub use manifest::ManifestDocument;
pub use oci::{
    ImageLayout, ImageReader, ImageWriter, MemoryRegistry, OciLayout, Registry, RegistryAuth,
    RegistryClient, RegistryConfig, RegistryImage,
};
pub use pack::{pack_bundle, pull_archive, push_archive, unpack_archive, PackOptions};
pub use relocate::{RelocateOptions, Relocation, Relocator};
pub use rewrite::ManifestRewriter;
pub use scan::{JsonPathEngine, ManifestScanner};
pub use staging::{StagedBundle, StagingAssembler, StagingDir, MANIFESTS_DIR};

/// kbundle Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
