//! Query evaluator seam used by locators and the manifest scanner.

use serde_json::Value;

use crate::error::Result;

/// Evaluates path expressions against decoded manifest documents.
///
/// Implementations must reject syntactically invalid queries in
/// [`QueryEngine::validate`] so that broken locators never reach a scan.
pub trait QueryEngine: Send + Sync {
    /// Check that `query` is a valid expression in this engine's grammar.
    fn validate(&self, query: &str) -> Result<()>;

    /// Evaluate `query` against `document`, returning every matched node.
    ///
    /// A document that simply lacks the queried nodes yields an empty list.
    fn query(&self, query: &str, document: &Value) -> Result<Vec<Value>>;
}
