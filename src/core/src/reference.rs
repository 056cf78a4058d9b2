//! Container image reference parsing.
//!
//! Parses references like `gcr.io/project/foo:12345` into their canonical
//! `registry/repository[:tag][@digest]` form. Identity and ordering are always
//! based on the canonical form; [`ImageRef::synonyms`] lists the other
//! spellings of the same image that may appear in manifest text.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Docker Hub namespace for single-segment official images.
const OFFICIAL_NAMESPACE: &str = "library";

/// Alternate hostnames that all mean Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &["index.docker.io", "registry-1.docker.io"];

/// Longest tag accepted by the distribution spec.
const MAX_TAG_LENGTH: usize = 128;

/// Shortest hex part accepted in a digest.
const MIN_DIGEST_HEX_LENGTH: usize = 32;

/// Parsed, canonical container image reference.
///
/// Created by parsing and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `gcr.io/org/image:tag` → gcr.io/org/image:tag
    /// - `gcr.io/org/image@sha256:abc...` → gcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        Self::parse_in(reference, "image reference")
    }

    /// Parse an image reference, attributing failures to `source_id`
    /// (a manifest path, a locator key, a command argument).
    pub fn parse_in(reference: &str, source_id: &str) -> Result<Self> {
        let fail = |message: String| BundleError::parse(reference, source_id, message);

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(fail("empty image reference".to_string()));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match trimmed.split_once('@') {
            Some((name_tag, digest)) => {
                validate_digest(digest).map_err(&fail)?;
                (name_tag, Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        // Split tag (: separator, but only after the last /)
        let tag_start = name_tag.rfind('/').map_or(0, |slash| slash + 1);
        let (name, tag) = match name_tag[tag_start..].rfind(':') {
            Some(colon) => {
                let split = tag_start + colon;
                let tag = &name_tag[split + 1..];
                validate_tag(tag).map_err(&fail)?;
                (&name_tag[..split], Some(tag.to_string()))
            }
            None => (name_tag, None),
        };

        let (registry, repository) = split_registry_repository(name).map_err(&fail)?;

        // Apply default tag if no tag and no digest
        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageRef {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry hostname (e.g., "gcr.io", "docker.io").
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path (e.g., "library/nginx", "project/foo").
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Digest, if any.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// `registry/repository`, without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Same tag and digest under a different name.
    ///
    /// `name` must be a bare `registry/repository` (no tag or digest).
    pub fn relocated_to(&self, name: &str) -> Result<ImageRef> {
        let fail = |message: String| BundleError::parse(name, "relocated name", message);
        if name.contains('@') || name[name.rfind('/').map_or(0, |i| i + 1)..].contains(':') {
            return Err(fail("relocated name must not carry a tag or digest".to_string()));
        }
        let (registry, repository) = split_registry_repository(name).map_err(&fail)?;
        Ok(ImageRef {
            registry,
            repository,
            tag: self.tag.clone(),
            digest: self.digest.clone(),
        })
    }

    /// Get the full canonical reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.name();
        s.push_str(&self.suffix());
        s
    }

    /// Alternate spellings of this reference, canonical form first.
    ///
    /// Covers the Docker Hub host aliases, an omitted default registry, an
    /// omitted `library/` namespace and an omitted implicit `latest` tag.
    pub fn synonyms(&self) -> Vec<String> {
        let mut names = vec![self.name()];
        if self.registry == DEFAULT_REGISTRY {
            let mut repositories = vec![self.repository.clone()];
            if let Some(short) = self
                .repository
                .strip_prefix(OFFICIAL_NAMESPACE)
                .and_then(|rest| rest.strip_prefix('/'))
            {
                if !short.contains('/') {
                    repositories.push(short.to_string());
                }
            }
            for repository in &repositories {
                for host in std::iter::once(&DEFAULT_REGISTRY).chain(DOCKER_HUB_ALIASES) {
                    names.push(format!("{}/{}", host, repository));
                }
                names.push(repository.clone());
            }
        }

        let mut suffixes = vec![self.suffix()];
        if self.tag.as_deref() == Some(DEFAULT_TAG) {
            suffixes.push(
                self.digest
                    .as_ref()
                    .map(|d| format!("@{}", d))
                    .unwrap_or_default(),
            );
        }

        let mut synonyms: Vec<String> = Vec::new();
        for suffix in &suffixes {
            for name in &names {
                let candidate = format!("{}{}", name, suffix);
                if !synonyms.contains(&candidate) {
                    synonyms.push(candidate);
                }
            }
        }
        synonyms
    }

    fn suffix(&self) -> String {
        let mut s = String::new();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl FromStr for ImageRef {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self> {
        ImageRef::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = BundleError;

    fn try_from(value: String) -> Result<Self> {
        ImageRef::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.full_reference()
    }
}

impl PartialOrd for ImageRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.full_reference().cmp(&other.full_reference())
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> std::result::Result<(String, String), String> {
    // The first component is a registry hostname if it contains a dot or
    // colon, or is "localhost"
    let (registry, path) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            validate_registry(first)?;
            (first.to_string(), rest)
        }
        _ => (DEFAULT_REGISTRY.to_string(), name),
    };

    let registry = if DOCKER_HUB_ALIASES.contains(&registry.as_str()) {
        DEFAULT_REGISTRY.to_string()
    } else {
        registry
    };

    if path.is_empty() {
        return Err("empty repository".to_string());
    }
    for component in path.split('/') {
        validate_component(component)?;
    }

    // Single name like "nginx" → "library/nginx" for Docker Hub
    let repository = if registry == DEFAULT_REGISTRY && !path.contains('/') {
        format!("{}/{}", OFFICIAL_NAMESPACE, path)
    } else {
        path.to_string()
    };

    Ok((registry, repository))
}

fn validate_registry(host: &str) -> std::result::Result<(), String> {
    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    if valid {
        Ok(())
    } else {
        Err(format!("invalid registry host '{}'", host))
    }
}

/// Repository path components: `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`.
fn validate_component(component: &str) -> std::result::Result<(), String> {
    let invalid = || format!("invalid repository component '{}'", component);
    let bytes = component.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    if bytes.is_empty() || !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return Err(invalid());
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let separator = &component[start..i];
        let allowed = separator == "."
            || separator == "_"
            || separator == "__"
            || separator.bytes().all(|b| b == b'-');
        if !allowed {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Tags: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut chars = tag.chars();
    let valid = tag.len() <= MAX_TAG_LENGTH
        && chars.next().is_some_and(word)
        && chars.all(|c| word(c) || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(format!("invalid tag '{}'", tag))
    }
}

fn validate_digest(digest: &str) -> std::result::Result<(), String> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(format!(
            "invalid digest '{}': expected algorithm:hex",
            digest
        ));
    };
    let algorithm_ok = algorithm.starts_with(|c: char| c.is_ascii_alphabetic())
        && algorithm
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '_' | '-'));
    let hex_ok =
        hex.len() >= MIN_DIGEST_HEX_LENGTH && hex.chars().all(|c| c.is_ascii_hexdigit());
    if algorithm_ok && hex_ok {
        Ok(())
    } else {
        Err(format!("invalid digest '{}'", digest))
    }
}
