//! Rewriting image references in manifests after relocation.
//!
//! Substitution is textual so comments and formatting survive. Every
//! spelling of an original reference (see [`ImageRef::synonyms`]) is
//! replaced when it stands alone between delimiters. A bare Docker Hub
//! short name such as `nginx` is too common a word for that, so it is only
//! replaced as the value of an `image:` key.

use std::path::{Path, PathBuf};

use kbundle_core::error::{BundleError, Result};
use regex::{Captures, Regex};

use crate::manifest::ManifestDocument;
use crate::relocate::Relocation;

struct Rule {
    pattern: Regex,
    replacement: String,
    synonym_len: usize,
}

/// Replaces original image references with their relocated names.
pub struct ManifestRewriter {
    rules: Vec<Rule>,
}

impl ManifestRewriter {
    pub fn new(relocations: &[Relocation]) -> Result<Self> {
        let mut rules = Vec::new();
        for relocation in relocations {
            let replacement = relocation.relocated.full_reference();
            for synonym in relocation.original.synonyms() {
                let escaped = regex::escape(&synonym);
                let source = if synonym.contains(['/', ':', '@']) {
                    format!(r#"(?m)(^|[\s"'\[,:])({})($|[\s"'\],])"#, escaped)
                } else {
                    format!(r#"(?m)(\bimage:\s*["']?)({})(["']?\s*$)"#, escaped)
                };
                let pattern = Regex::new(&source).map_err(|e| {
                    BundleError::Other(format!("Failed to build pattern for {}: {}", synonym, e))
                })?;
                rules.push(Rule {
                    pattern,
                    replacement: replacement.clone(),
                    synonym_len: synonym.len(),
                });
            }
        }
        rules.sort_by(|a, b| b.synonym_len.cmp(&a.synonym_len));
        Ok(Self { rules })
    }

    /// Rewrite one document's text.
    pub fn rewrite_text(&self, text: &str) -> String {
        let mut text = text.to_string();
        for rule in &self.rules {
            // Adjacent matches share a delimiter; the second pass catches
            // the ones the first consumed.
            for _ in 0..2 {
                let next = rule
                    .pattern
                    .replace_all(&text, |caps: &Captures| {
                        format!("{}{}{}", &caps[1], rule.replacement, &caps[3])
                    })
                    .into_owned();
                if next == text {
                    break;
                }
                text = next;
            }
        }
        text
    }

    pub fn rewrite(&self, doc: &ManifestDocument) -> ManifestDocument {
        let text = String::from_utf8_lossy(doc.raw());
        ManifestDocument::new(doc.id(), self.rewrite_text(&text))
    }

    /// Write rewritten copies of `docs` into `out_dir`, keeping basenames.
    pub fn rewrite_all_to(&self, docs: &[ManifestDocument], out_dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)
            .map_err(|e| BundleError::io(format!("Failed to create {}", out_dir.display()), e))?;

        let mut written = Vec::with_capacity(docs.len());
        for doc in docs {
            let path = out_dir.join(doc.basename()?);
            std::fs::write(&path, self.rewrite(doc).raw())
                .map_err(|e| BundleError::io(format!("Failed to write {}", path.display()), e))?;
            tracing::debug!(manifest = doc.id(), path = %path.display(), "Rewrote manifest");
            written.push(path);
        }
        Ok(written)
    }
}
