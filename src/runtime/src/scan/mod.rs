//! Image discovery in Kubernetes manifests.
//!
//! Every YAML document in a manifest is checked against two kinds of rules:
//!
//! - built-in: the `image` of every entry under `spec.containers` or
//!   `spec.initContainers`, at any depth (Pods, Deployments, Jobs, CronJobs...)
//! - user-defined: a [`UserDefinedImageLocator`] whose `(apiVersion, kind)`
//!   equals the document's, for images inside custom resources
//!
//! Every match must parse as an image reference; the first one that does not
//! aborts the scan.

mod jsonpath;

pub use jsonpath::JsonPathEngine;

use std::sync::Arc;

use kbundle_core::config::{Arity, UserDefinedImageLocator};
use kbundle_core::error::{BundleError, Result};
use kbundle_core::query::QueryEngine;
use kbundle_core::{ImageRef, ImageSet};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::manifest::ManifestDocument;

/// Built-in queries for workload images.
const BUILTIN_QUERIES: &[&str] = &[
    "$..spec.containers[*].image",
    "$..spec.initContainers[*].image",
];

/// Extracts the images referenced by manifest documents.
pub struct ManifestScanner {
    engine: Arc<dyn QueryEngine>,
}

impl ManifestScanner {
    /// Create a scanner evaluating queries with `engine`.
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self { engine }
    }

    /// Query engine used for built-in rules and locators.
    pub fn engine(&self) -> &dyn QueryEngine {
        self.engine.as_ref()
    }

    /// Scan every document and union the results.
    pub fn scan_all(
        &self,
        documents: &[ManifestDocument],
        locators: &[UserDefinedImageLocator],
    ) -> Result<ImageSet> {
        documents.iter().try_fold(ImageSet::empty(), |images, doc| {
            Ok(images.union(&self.scan(doc, locators)?))
        })
    }

    /// Find every image referenced by one manifest file.
    pub fn scan(
        &self,
        doc: &ManifestDocument,
        locators: &[UserDefinedImageLocator],
    ) -> Result<ImageSet> {
        let mut found = Vec::new();

        for part in serde_yaml::Deserializer::from_slice(doc.raw()) {
            let value = YamlValue::deserialize(part).map_err(|e| {
                BundleError::Serialization(format!("Failed to decode {}: {}", doc.id(), e))
            })?;
            if value.is_null() {
                continue;
            }
            let tree = yaml_to_json(&value);

            for query in BUILTIN_QUERIES {
                for node in self.engine.query(query, &tree)? {
                    found.push(parse_node(&node, doc.id())?);
                }
            }

            let (Some(api_version), Some(kind)) = (
                tree.get("apiVersion").and_then(JsonValue::as_str),
                tree.get("kind").and_then(JsonValue::as_str),
            ) else {
                continue;
            };

            for locator in locators.iter().filter(|l| l.matches(api_version, kind)) {
                let source = format!("{} (locator {})", doc.id(), locator.key());
                let nodes = self.engine.query(&locator.query, &tree)?;
                found.extend(collect_locator_matches(&nodes, locator.arity, &source)?);
            }
        }

        let images: ImageSet = found.into_iter().collect();
        tracing::debug!(manifest = %doc.id(), images = images.len(), "Scanned manifest");
        Ok(images)
    }
}

fn collect_locator_matches(
    nodes: &[JsonValue],
    arity: Arity,
    source: &str,
) -> Result<Vec<ImageRef>> {
    match arity {
        Arity::Single => match nodes {
            [] => Ok(Vec::new()),
            [node] => Ok(vec![parse_node(node, source)?]),
            _ => Err(BundleError::parse(
                JsonValue::Array(nodes.to_vec()).to_string(),
                source,
                format!("expected a single image, query matched {} nodes", nodes.len()),
            )),
        },
        Arity::Multiple => {
            let mut images = Vec::new();
            for node in nodes {
                match node {
                    JsonValue::String(list) => {
                        for item in list
                            .split(|c: char| c.is_whitespace() || c == ',')
                            .filter(|s| !s.is_empty())
                        {
                            images.push(ImageRef::parse_in(item, source)?);
                        }
                    }
                    JsonValue::Array(items) => {
                        for item in items {
                            images.push(parse_node(item, source)?);
                        }
                    }
                    other => images.push(parse_node(other, source)?),
                }
            }
            Ok(images)
        }
    }
}

fn parse_node(node: &JsonValue, source: &str) -> Result<ImageRef> {
    match node {
        JsonValue::String(s) => ImageRef::parse_in(s, source),
        other => Err(BundleError::parse(
            other.to_string(),
            source,
            "image reference must be a string",
        )),
    }
}

/// Convert a decoded YAML tree into the JSON model the query engine works on.
fn yaml_to_json(value: &YamlValue) -> JsonValue {
    match value {
        YamlValue::Null => JsonValue::Null,
        YamlValue::Bool(b) => JsonValue::Bool(*b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::from(i)
            } else if let Some(u) = n.as_u64() {
                JsonValue::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(JsonValue::Null, JsonValue::Number)
            }
        }
        YamlValue::String(s) => JsonValue::String(s.clone()),
        YamlValue::Sequence(items) => JsonValue::Array(items.iter().map(yaml_to_json).collect()),
        YamlValue::Mapping(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (mapping_key(k), yaml_to_json(v)))
                .collect(),
        ),
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

fn mapping_key(key: &YamlValue) -> String {
    match key {
        YamlValue::String(s) => s.clone(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Null => "null".to_string(),
        other => yaml_to_json(other).to_string(),
    }
}
