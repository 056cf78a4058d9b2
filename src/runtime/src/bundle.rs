//! Bundle directories: `bundle.json` plus the manifests around it.

use std::path::{Path, PathBuf};

use kbundle_core::config::{BundleConfig, UserDefinedImageLocator, BUNDLE_FILE};
use kbundle_core::error::{BundleError, Result};
use kbundle_core::query::QueryEngine;
use kbundle_core::{ImageRef, ImageSet};
use walkdir::{DirEntry, WalkDir};

use crate::manifest::{is_manifest_path, ManifestDocument};
use crate::scan::ManifestScanner;

/// Top-level directory holding fetched images; never scanned for manifests.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Image layout location relative to a bundle or staging root.
pub const LAYOUT_DIR: &str = "artifacts/layout";

/// A bundle: its metadata and the manifests found under its root.
#[derive(Debug, Clone)]
pub struct Bundle {
    root: PathBuf,
    config: BundleConfig,
    manifests: Vec<ManifestDocument>,
}

impl Bundle {
    pub fn new(
        root: impl Into<PathBuf>,
        config: BundleConfig,
        manifests: Vec<ManifestDocument>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            manifests,
        }
    }

    /// Create `bundle.json` in `root`, which may already hold manifests.
    pub fn init(root: &Path, name: &str, version: Option<&str>) -> Result<Self> {
        let path = root.join(BUNDLE_FILE);
        if path.exists() {
            return Err(BundleError::Collision {
                first: path.display().to_string(),
                second: format!("new bundle '{}'", name),
            });
        }

        let config = BundleConfig::new(name, version)?;
        std::fs::create_dir_all(root)
            .map_err(|e| BundleError::io(format!("Failed to create {}", root.display()), e))?;
        config.save(root)?;

        tracing::info!(root = %root.display(), name, "Initialized bundle");
        Ok(Self::new(root, config, discover_manifests(root)?))
    }

    /// Read `bundle.json` and every manifest under `root`.
    pub fn load(root: &Path, engine: &dyn QueryEngine) -> Result<Self> {
        let config = BundleConfig::load(root, engine)?;
        let manifests = discover_manifests(root)?;
        tracing::debug!(
            root = %root.display(),
            manifests = manifests.len(),
            "Loaded bundle"
        );
        Ok(Self::new(root, config, manifests))
    }

    /// Write `bundle.json` back to the bundle root.
    pub fn save(&self) -> Result<()> {
        self.config.save(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    pub fn manifests(&self) -> &[ManifestDocument] {
        &self.manifests
    }

    /// Declare an image and persist the change.
    pub fn add_image(&mut self, reference: &str) -> Result<ImageRef> {
        let image = self.config.add_image(reference)?;
        self.save()?;
        Ok(image)
    }

    /// Add or replace a locator and persist the change.
    pub fn set_locator(
        &mut self,
        locator: UserDefinedImageLocator,
        engine: &dyn QueryEngine,
    ) -> Result<()> {
        self.config.set_locator(locator, engine)?;
        self.save()
    }

    /// Remove a locator and persist the change.
    pub fn delete_locator(&mut self, api_version: &str, kind: &str) -> Result<UserDefinedImageLocator> {
        let removed = self.config.delete_locator(api_version, kind)?;
        self.save()?;
        Ok(removed)
    }

    /// Images found in the manifests plus those declared in `bundle.json`.
    pub fn images(&self, scanner: &ManifestScanner) -> Result<ImageSet> {
        let scanned = scanner.scan_all(&self.manifests, self.config.locators())?;
        Ok(scanned.union(self.config.images()))
    }

    /// Location of the bundle's image layout, present after unpacking.
    pub fn layout_path(&self) -> PathBuf {
        self.root.join(LAYOUT_DIR)
    }
}

/// Every `*.yaml`/`*.yml` file under `root` except the artifacts tree, in
/// path order. IDs are root-relative paths.
fn discover_manifests(root: &Path) -> Result<Vec<ManifestDocument>> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_artifacts_dir(entry));

    let mut manifests = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            BundleError::Other(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() || !is_manifest_path(entry.path()) {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let raw = std::fs::read(entry.path()).map_err(|e| {
            BundleError::io(format!("Failed to read manifest {}", entry.path().display()), e)
        })?;
        manifests.push(ManifestDocument::new(id, raw));
    }
    Ok(manifests)
}

fn is_artifacts_dir(entry: &DirEntry) -> bool {
    entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == ARTIFACTS_DIR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::JsonPathEngine;
    use kbundle_core::config::Arity;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
        - name: web
          image: nginx:1.7.9
";

    fn scanner() -> ManifestScanner {
        ManifestScanner::new(Arc::new(JsonPathEngine::new()))
    }

    #[test]
    fn test_init_and_load() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("deploy.yaml"), DEPLOYMENT).unwrap();

        let bundle = Bundle::init(dir.path(), "app", None).unwrap();
        assert_eq!(bundle.config().name(), "app");
        assert_eq!(bundle.manifests().len(), 1);

        let loaded = Bundle::load(dir.path(), &JsonPathEngine::new()).unwrap();
        assert_eq!(loaded.config().version(), "0.1.0");
        assert_eq!(loaded.manifests()[0].id(), "deploy.yaml");
    }

    #[test]
    fn test_init_twice_collides() {
        let dir = TempDir::new().unwrap();
        Bundle::init(dir.path(), "app", None).unwrap();
        assert!(matches!(
            Bundle::init(dir.path(), "app", None),
            Err(BundleError::Collision { .. })
        ));
    }

    #[test]
    fn test_discovery_skips_artifacts_and_other_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("deploy/nested")).unwrap();
        fs::create_dir_all(dir.path().join("artifacts/layout")).unwrap();
        fs::write(dir.path().join("deploy/b.yml"), "kind: A").unwrap();
        fs::write(dir.path().join("deploy/nested/a.yaml"), "kind: B").unwrap();
        fs::write(dir.path().join("artifacts/layout/x.yaml"), "kind: C").unwrap();
        fs::write(dir.path().join("README.md"), "# app").unwrap();

        let ids: Vec<String> = discover_manifests(dir.path())
            .unwrap()
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        assert_eq!(ids, vec!["deploy/b.yml", "deploy/nested/a.yaml"]);
    }

    #[test]
    fn test_images_union_declared_and_scanned() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("deploy.yaml"), DEPLOYMENT).unwrap();
        let mut bundle = Bundle::init(dir.path(), "app", None).unwrap();
        bundle.add_image("redis:7").unwrap();

        let images = bundle.images(&scanner()).unwrap();
        assert_eq!(
            images.strings(),
            vec!["docker.io/library/nginx:1.7.9", "docker.io/library/redis:7"]
        );
    }

    #[test]
    fn test_mutations_persist() {
        let dir = TempDir::new().unwrap();
        let engine = JsonPathEngine::new();
        let mut bundle = Bundle::init(dir.path(), "app", Some("2.0.0")).unwrap();

        bundle.add_image("quay.io/a/b:1").unwrap();
        bundle
            .set_locator(
                UserDefinedImageLocator::new(
                    "example.com/v1".to_string(),
                    "Widget".to_string(),
                    "spec.image".to_string(),
                    Arity::Single,
                ),
                &engine,
            )
            .unwrap();

        let loaded = Bundle::load(dir.path(), &engine).unwrap();
        assert_eq!(loaded.config().images().strings(), vec!["quay.io/a/b:1"]);
        assert_eq!(loaded.config().locators().len(), 1);

        let mut loaded = loaded;
        loaded.delete_locator("example.com/v1", "Widget").unwrap();
        let reloaded = Bundle::load(dir.path(), &engine).unwrap();
        assert!(reloaded.config().locators().is_empty());
        assert!(matches!(
            loaded.delete_locator("example.com/v1", "Widget"),
            Err(BundleError::NotFound(_))
        ));
    }
}
