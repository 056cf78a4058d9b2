//! Repository path flattening for relocation.
//!
//! Maps an image's repository path to a single repository component under a
//! new prefix: `<prefix>/<human-readable>-<md5(path)>`. The MD5 suffix keeps
//! distinct paths distinct; the human-readable part is shortened until the
//! whole name fits the registry's name length limit.

use kbundle_core::error::{BundleError, Result};
use kbundle_core::ImageRef;
use md5::{Digest, Md5};

/// Longest repository name (including the registry host) registries accept.
pub const MAX_NAME_LENGTH: usize = 255;

/// Marker placed where leading path segments were dropped.
const ELISION: &str = "--";

/// Relocate `image` under `prefix`, keeping its tag and digest.
///
/// # Errors
///
/// Returns a parse error if `prefix` is empty, is not a valid repository
/// name, or is too long to leave room for the hash component.
pub fn flatten(prefix: &str, image: &ImageRef) -> Result<ImageRef> {
    let prefix = prefix.trim().trim_end_matches('/');
    if prefix.is_empty() {
        return Err(BundleError::parse(prefix, "relocation prefix", "empty prefix"));
    }

    let path = image.repository();
    let hash = hex::encode(Md5::digest(path.as_bytes()));

    let hash_only = format!("{}/{}", prefix, hash);
    if hash_only.len() > MAX_NAME_LENGTH {
        return Err(BundleError::parse(
            prefix,
            "relocation prefix",
            format!(
                "prefix leaves no room for a repository name within {} characters",
                MAX_NAME_LENGTH
            ),
        ));
    }

    let available =
        MAX_NAME_LENGTH.saturating_sub(prefix.len() + "/".len() + "-".len() + hash.len());
    let human = readable_part(path, available);

    let name = if human.is_empty() {
        hash_only
    } else {
        format!("{}/{}-{}", prefix, human, hash)
    };

    image.relocated_to(&name).map_err(|e| match e {
        BundleError::Parse { message, .. } => {
            BundleError::parse(prefix, "relocation prefix", message)
        }
        other => other,
    })
}

/// Longest reduction of `path` that fits in `available` characters.
fn readable_part(path: &str, available: usize) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    (1..=segments.len())
        .rev()
        .map(|n| reduce(&segments, n))
        .find(|candidate| candidate.len() <= available)
        .unwrap_or_default()
}

/// Keep `n` segments: the first `n - 1` and always the last one.
fn reduce(segments: &[&str], n: usize) -> String {
    let total = segments.len();
    let last = segments[total - 1];
    if n >= total {
        segments.join("-")
    } else if n <= 1 {
        last.to_string()
    } else {
        format!("{}{}{}", segments[..n - 1].join("-"), ELISION, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(s: &str) -> ImageRef {
        ImageRef::parse(s).unwrap()
    }

    fn full_name(r: &ImageRef) -> String {
        r.name()
    }

    #[test]
    fn test_relocation_example() {
        let moved = flatten("example.com/project", &image("gcr.io/project/foo:12345")).unwrap();
        assert_eq!(
            full_name(&moved),
            "example.com/project/project-foo-ccb4875fd22f010124efaeb0d978e821"
        );
        assert_eq!(moved.tag(), Some("12345"));
        assert_eq!(moved.digest(), None);
    }

    #[test]
    fn test_docker_hub_image() {
        let moved = flatten("example.com/mirror", &image("nginx")).unwrap();
        assert_eq!(
            moved.to_string(),
            "example.com/mirror/library-nginx-08c6c490ec04dfdf06f283c84ac3babe:latest"
        );
    }

    #[test]
    fn test_digest_preserved() {
        let digest = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let moved =
            flatten("example.com/p", &image(&format!("gcr.io/a/b:v1@{}", digest))).unwrap();
        assert_eq!(moved.tag(), Some("v1"));
        assert_eq!(moved.digest(), Some(digest));

        let moved = flatten("example.com/p", &image(&format!("gcr.io/a/b@{}", digest))).unwrap();
        assert_eq!(moved.tag(), None);
        assert_eq!(moved.digest(), Some(digest));
    }

    #[test]
    fn test_deterministic() {
        let a = flatten("example.com/p", &image("quay.io/x/y/z:1")).unwrap();
        let b = flatten("example.com/p", &image("quay.io/x/y/z:1")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_paths_do_not_collide() {
        // Same readable form, different paths.
        let a = flatten("example.com/p", &image("gcr.io/a-b/c")).unwrap();
        let b = flatten("example.com/p", &image("gcr.io/a/b-c")).unwrap();
        assert_ne!(a.repository(), b.repository());

        // The hash covers the path only, so the source registry does not matter.
        let c = flatten("example.com/p", &image("gcr.io/a/b")).unwrap();
        let d = flatten("example.com/p", &image("quay.io/a/b")).unwrap();
        assert_eq!(c.repository(), d.repository());
    }

    #[test]
    fn test_trailing_slash_in_prefix() {
        let a = flatten("example.com/p/", &image("gcr.io/a/b")).unwrap();
        let b = flatten("example.com/p", &image("gcr.io/a/b")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reduce() {
        let segments = ["a", "b", "c", "d"];
        assert_eq!(reduce(&segments, 4), "a-b-c-d");
        assert_eq!(reduce(&segments, 3), "a-b--d");
        assert_eq!(reduce(&segments, 2), "a--d");
        assert_eq!(reduce(&segments, 1), "d");
    }

    #[test]
    fn test_long_path_is_shortened() {
        let long_segment = "s".repeat(60);
        let path = format!("gcr.io/{0}/{0}/{0}/{0}/last:1", long_segment);
        let prefix = "registry.example.com/some/team";
        let moved = flatten(prefix, &image(&path)).unwrap();
        let name = full_name(&moved);
        assert!(name.len() <= MAX_NAME_LENGTH, "{} is too long", name);
        assert!(name.contains("--last-"), "{name}");
    }

    #[test]
    fn test_degrades_to_hash_only() {
        let prefix = format!("example.com/{}", "p".repeat(200));
        let moved = flatten(&prefix, &image(&format!("gcr.io/{}", "x".repeat(40)))).unwrap();
        let name = full_name(&moved);
        let last = name.rsplit('/').next().unwrap();
        assert_eq!(last.len(), 32);
        assert!(last.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(name.len() <= MAX_NAME_LENGTH);
    }

    #[test]
    fn test_length_bound_holds() {
        for prefix_len in [5usize, 50, 120, 200, 217] {
            let prefix = format!("r.io/{}", "p".repeat(prefix_len));
            for path in ["a", "a/b", "org/team/project/service", "q".repeat(100).as_str()] {
                let moved = flatten(&prefix, &image(&format!("gcr.io/{}:1", path))).unwrap();
                assert!(full_name(&moved).len() <= MAX_NAME_LENGTH);
            }
        }
    }

    #[test]
    fn test_prefix_too_long() {
        let prefix = format!("example.com/{}", "p".repeat(230));
        assert!(matches!(
            flatten(&prefix, &image("nginx")),
            Err(BundleError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(flatten("", &image("nginx")).is_err());
        assert!(flatten("Example.com/UPPER", &image("nginx")).is_err());
        assert!(flatten("example.com/p:tag", &image("nginx")).is_err());
    }
}
