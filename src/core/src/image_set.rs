//! Deduplicated, immutable set of image references.
//!
//! Identity is the canonical reference string; iteration and serialization
//! are always in sorted order.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;
use crate::reference::ImageRef;

/// Immutable set of [`ImageRef`]s keyed by canonical identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    images: BTreeMap<String, ImageRef>,
}

impl ImageSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse every string; fails on the first unparseable entry.
    pub fn new<I, S>(references: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        references
            .into_iter()
            .map(|r| ImageRef::parse(r.as_ref()))
            .collect()
    }

    /// Set containing every image of `self` and `other`.
    pub fn union(&self, other: &ImageSet) -> ImageSet {
        let mut images = self.images.clone();
        for (key, image) in &other.images {
            images
                .entry(key.clone())
                .or_insert_with(|| image.clone());
        }
        ImageSet { images }
    }

    /// Set with one more image.
    pub fn with(&self, image: ImageRef) -> ImageSet {
        self.union(&ImageSet::from_iter([image]))
    }

    /// The images, in no particular order.
    pub fn slice(&self) -> Vec<ImageRef> {
        self.images.values().cloned().collect()
    }

    /// Canonical strings, sorted lexicographically.
    pub fn strings(&self) -> Vec<String> {
        self.images.keys().cloned().collect()
    }

    /// Iterate in sorted canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageRef> {
        self.images.values()
    }

    pub fn contains(&self, image: &ImageRef) -> bool {
        self.images.contains_key(&image.full_reference())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FromIterator<ImageRef> for ImageSet {
    fn from_iter<T: IntoIterator<Item = ImageRef>>(iter: T) -> Self {
        let images = iter
            .into_iter()
            .map(|image| (image.full_reference(), image))
            .collect();
        ImageSet { images }
    }
}

impl Serialize for ImageSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.images.keys())
    }
}

impl<'de> Deserialize<'de> for ImageSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        ImageSet::new(strings).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BundleError;

    #[test]
    fn test_new_sorts_and_deduplicates() {
        let set = ImageSet::new(["nginx:1.7.9", "gcr.io/b/c:1", "docker.io/library/nginx:1.7.9"])
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.strings(),
            vec!["docker.io/library/nginx:1.7.9", "gcr.io/b/c:1"]
        );
    }

    #[test]
    fn test_new_fails_on_first_bad_entry() {
        let result = ImageSet::new(["nginx", "NOT VALID", "alpine"]);
        match result {
            Err(BundleError::Parse { value, .. }) => assert_eq!(value, "NOT VALID"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_set() {
        let set = ImageSet::empty();
        assert!(set.is_empty());
        assert!(set.strings().is_empty());
        assert_eq!(set, ImageSet::new(Vec::<String>::new()).unwrap());
    }

    #[test]
    fn test_union() {
        let a = ImageSet::new(["a", "b"]).unwrap();
        let b = ImageSet::new(["b", "c"]).unwrap();
        let union = a.union(&b);
        assert_eq!(union.len(), 3);
        assert_eq!(a.len(), 2, "union must not mutate its inputs");
        assert!(union.contains(&ImageRef::parse("c").unwrap()));
    }

    #[test]
    fn test_with_adds_one_image() {
        let set = ImageSet::empty().with(ImageRef::parse("alpine").unwrap());
        assert_eq!(set.strings(), vec!["docker.io/library/alpine:latest"]);
    }

    #[test]
    fn test_slice_contains_every_image() {
        let set = ImageSet::new(["a", "b", "c"]).unwrap();
        let mut slice = set.slice();
        slice.sort();
        assert_eq!(slice, set.iter().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn test_json_round_trip() {
        let set = ImageSet::new(["quay.io/x/y:2", "nginx"]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"["docker.io/library/nginx:latest","quay.io/x/y:2"]"#
        );
        let back: ImageSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_deserialize_rejects_bad_entry() {
        assert!(serde_json::from_str::<ImageSet>(r#"["nginx", "Bad"]"#).is_err());
    }
}
