//! Bundle metadata (`bundle.json`).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};
use crate::image_set::ImageSet;
use crate::query::QueryEngine;
use crate::reference::ImageRef;

/// Schema version written by this release.
pub const SCHEMA_VERSION: &str = "v1alpha1";

/// Version given to bundles created without one.
pub const DEFAULT_VERSION: &str = "0.1.0";

/// File name of the bundle metadata inside a bundle or staging directory.
pub const BUNDLE_FILE: &str = "bundle.json";

/// How many images a locator query yields per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arity {
    /// The query matches one image reference.
    Single,
    /// The query matches a list of image references.
    Multiple,
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Single => write!(f, "single"),
            Arity::Multiple => write!(f, "multiple"),
        }
    }
}

impl std::str::FromStr for Arity {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(Arity::Single),
            "multiple" => Ok(Arity::Multiple),
            other => Err(BundleError::Validation(format!(
                "locator type must be 'single' or 'multiple', got '{}'",
                other
            ))),
        }
    }
}

/// User-declared rule for finding images inside custom resources.
///
/// Keyed by `(api_version, kind)`; a bundle holds at most one locator per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinedImageLocator {
    pub api_version: String,
    pub kind: String,
    #[serde(rename = "jsonPath")]
    pub query: String,
    #[serde(rename = "type")]
    pub arity: Arity,
}

impl UserDefinedImageLocator {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        query: impl Into<String>,
        arity: Arity,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            query: query.into(),
            arity,
        }
    }

    /// `apiVersion/kind` identifier used in messages.
    pub fn key(&self) -> String {
        format!("{}/{}", self.api_version, self.kind)
    }

    /// Whether this locator applies to a document of the given type.
    pub fn matches(&self, api_version: &str, kind: &str) -> bool {
        self.api_version == api_version && self.kind == kind
    }

    /// Reject locators with missing fields or an unparseable query.
    pub fn validate(&self, engine: &dyn QueryEngine) -> Result<()> {
        let missing: Vec<&str> = [
            ("apiVersion", &self.api_version),
            ("kind", &self.kind),
            ("jsonPath", &self.query),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field)
        .collect();
        if !missing.is_empty() {
            return Err(BundleError::Validation(format!(
                "locator '{}' is missing {}",
                self.key(),
                missing.join(", ")
            )));
        }

        engine.validate(&self.query).map_err(|e| {
            BundleError::Validation(format!(
                "locator '{}' has an invalid query '{}': {}",
                self.key(),
                self.query,
                e
            ))
        })
    }
}

/// Locator as it appears on disk, before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLocator {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default, rename = "jsonPath")]
    query: String,
    #[serde(default, rename = "type")]
    arity: Option<String>,
}

/// `bundle.json` as it appears on disk, before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    schema_version: String,
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    images: ImageSet,
    #[serde(default)]
    user_defined_images: Vec<RawLocator>,
}

/// Bundle metadata: identity, declared images and locators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleConfig {
    schema_version: String,
    name: String,
    version: String,
    #[serde(skip_serializing_if = "ImageSet::is_empty")]
    images: ImageSet,
    #[serde(rename = "userDefinedImages", skip_serializing_if = "Vec::is_empty")]
    locators: Vec<UserDefinedImageLocator>,
}

impl BundleConfig {
    /// Create the metadata for a new bundle.
    pub fn new(name: &str, version: Option<&str>) -> Result<Self> {
        validate_name(name)?;
        let version = match version {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => DEFAULT_VERSION.to_string(),
        };
        Ok(Self {
            schema_version: SCHEMA_VERSION.to_string(),
            name: name.to_string(),
            version,
            images: ImageSet::empty(),
            locators: Vec::new(),
        })
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Images declared explicitly with `add-image`.
    pub fn images(&self) -> &ImageSet {
        &self.images
    }

    /// Locators, sorted by API version then kind.
    pub fn locators(&self) -> &[UserDefinedImageLocator] {
        &self.locators
    }

    /// Archive file name, `<name>-<version>.tgz`.
    pub fn archive_file_name(&self) -> String {
        format!("{}-{}.tgz", self.name, self.version)
    }

    /// Declare an image explicitly.
    pub fn add_image(&mut self, reference: &str) -> Result<ImageRef> {
        let image = ImageRef::parse_in(reference, "add-image")?;
        self.images = self.images.with(image.clone());
        Ok(image)
    }

    /// Add or replace the locator for its `(apiVersion, kind)` key.
    pub fn set_locator(
        &mut self,
        locator: UserDefinedImageLocator,
        engine: &dyn QueryEngine,
    ) -> Result<()> {
        locator.validate(engine)?;
        self.locators
            .retain(|l| !l.matches(&locator.api_version, &locator.kind));
        self.locators.push(locator);
        self.sort_locators();
        Ok(())
    }

    /// Remove the locator for `(api_version, kind)`.
    pub fn delete_locator(
        &mut self,
        api_version: &str,
        kind: &str,
    ) -> Result<UserDefinedImageLocator> {
        let position = self
            .locators
            .iter()
            .position(|l| l.matches(api_version, kind))
            .ok_or_else(|| {
                BundleError::NotFound(format!("locator {}/{}", api_version, kind))
            })?;
        Ok(self.locators.remove(position))
    }

    /// Decode and validate a `bundle.json` document.
    pub fn from_json(data: &[u8], engine: &dyn QueryEngine) -> Result<Self> {
        let raw: RawConfig = serde_json::from_slice(data)?;
        validate_name(&raw.name)?;

        let mut locators: Vec<UserDefinedImageLocator> =
            Vec::with_capacity(raw.user_defined_images.len());
        for raw_locator in raw.user_defined_images {
            let arity = match raw_locator.arity {
                Some(arity) => arity.parse()?,
                None => {
                    return Err(BundleError::Validation(format!(
                        "locator '{}/{}' is missing type",
                        raw_locator.api_version, raw_locator.kind
                    )))
                }
            };
            let locator = UserDefinedImageLocator::new(
                raw_locator.api_version,
                raw_locator.kind,
                raw_locator.query,
                arity,
            );
            locator.validate(engine)?;
            if locators
                .iter()
                .any(|l| l.matches(&locator.api_version, &locator.kind))
            {
                return Err(BundleError::Validation(format!(
                    "duplicate locator for '{}/{}'",
                    locator.api_version, locator.kind
                )));
            }
            locators.push(locator);
        }

        let mut config = Self {
            schema_version: raw.schema_version,
            name: raw.name,
            version: raw
                .version
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            images: raw.images,
            locators,
        };
        config.sort_locators();
        Ok(config)
    }

    /// Encode as indented JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read `bundle.json` from `dir`.
    pub fn load(dir: &Path, engine: &dyn QueryEngine) -> Result<Self> {
        let path = dir.join(BUNDLE_FILE);
        let data = std::fs::read(&path)
            .map_err(|e| BundleError::io(format!("Failed to read {}", path.display()), e))?;
        Self::from_json(&data, engine).map_err(|e| match e {
            BundleError::Serialization(msg) => {
                BundleError::Serialization(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Write `bundle.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(BUNDLE_FILE);
        std::fs::write(&path, self.to_json_pretty()?)
            .map_err(|e| BundleError::io(format!("Failed to write {}", path.display()), e))?;
        tracing::debug!(path = %path.display(), "Wrote bundle metadata");
        Ok(())
    }

    fn sort_locators(&mut self) {
        self.locators.sort_by(|a, b| {
            (a.api_version.as_str(), a.kind.as_str()).cmp(&(b.api_version.as_str(), b.kind.as_str()))
        });
    }
}

fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(BundleError::Validation(format!(
            "invalid bundle name '{}': must be non-empty and contain no path separators",
            name
        )));
    }
    Ok(())
}
