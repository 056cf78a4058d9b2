//! kbundle Core - Foundational Types
//!
//! Image references, image sets, bundle metadata and the query-engine seam
//! shared by the kbundle runtime and CLI.

pub mod config;
pub mod error;
pub mod image_set;
pub mod query;
pub mod reference;

// Re-export commonly used types
pub use config::{Arity, BundleConfig, UserDefinedImageLocator, BUNDLE_FILE};
pub use error::{BundleError, Result};
pub use image_set::ImageSet;
pub use query::QueryEngine;
pub use reference::ImageRef;

/// kbundle version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
