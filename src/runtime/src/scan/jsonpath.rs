//! JSONPath query engine backed by `serde_json_path`.

use kbundle_core::error::{BundleError, Result};
use kbundle_core::query::QueryEngine;
use serde_json::Value;
use serde_json_path::JsonPath;

/// RFC 9535 JSONPath evaluator.
///
/// Accepts `$`-rooted paths, bare dotted paths (`spec.images[*]`) and the
/// kubectl brace form (`{.spec.images[*]}`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPathEngine;

impl JsonPathEngine {
    pub fn new() -> Self {
        Self
    }

    fn compile(&self, query: &str) -> Result<JsonPath> {
        let normalized = normalize(query);
        JsonPath::parse(&normalized)
            .map_err(|e| BundleError::parse(query, "query", e.to_string()))
    }
}

impl QueryEngine for JsonPathEngine {
    fn validate(&self, query: &str) -> Result<()> {
        self.compile(query).map(|_| ())
    }

    fn query(&self, query: &str, document: &Value) -> Result<Vec<Value>> {
        let path = self.compile(query)?;
        Ok(path.query(document).all().into_iter().cloned().collect())
    }
}

/// Rewrite the accepted query spellings into a `$`-rooted path.
fn normalize(query: &str) -> String {
    let query = query.trim();
    let query = query
        .strip_prefix('{')
        .and_then(|q| q.strip_suffix('}'))
        .unwrap_or(query)
        .trim();

    if query.starts_with('$') {
        query.to_string()
    } else if query.starts_with('.') || query.starts_with('[') {
        format!("${}", query)
    } else {
        format!("$.{}", query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("spec.images[*]"), "$.spec.images[*]");
        assert_eq!(normalize(".spec.image"), "$.spec.image");
        assert_eq!(normalize("{.spec.image}"), "$.spec.image");
        assert_eq!(normalize("  $..image "), "$..image");
        assert_eq!(normalize("['spec']"), "$['spec']");
    }

    #[test]
    fn test_validate() {
        let engine = JsonPathEngine::new();
        assert!(engine.validate("spec.images[*]").is_ok());
        assert!(engine.validate("$..spec.containers[*].image").is_ok());
        assert!(matches!(
            engine.validate("spec.images[*"),
            Err(BundleError::Parse { .. })
        ));
        assert!(engine.validate("$$").is_err());
    }

    #[test]
    fn test_query_matches_nodes() {
        let engine = JsonPathEngine::new();
        let doc = json!({"spec": {"images": ["a", "b"], "other": 1}});
        let nodes = engine.query("spec.images[*]", &doc).unwrap();
        assert_eq!(nodes, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_query_missing_path_is_empty() {
        let engine = JsonPathEngine::new();
        let doc = json!({"metadata": {"name": "x"}});
        assert!(engine.query("spec.image", &doc).unwrap().is_empty());
    }

    #[test]
    fn test_descendant_query() {
        let engine = JsonPathEngine::new();
        let doc = json!({
            "spec": {"template": {"spec": {"containers": [
                {"name": "web", "image": "nginx:1.7.9"},
                {"name": "sidecar", "image": "envoy:v1"}
            ]}}}
        });
        let nodes = engine.query("$..spec.containers[*].image", &doc).unwrap();
        assert_eq!(nodes, vec![json!("nginx:1.7.9"), json!("envoy:v1")]);
    }
}
