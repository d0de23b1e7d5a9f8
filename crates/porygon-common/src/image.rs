//! Container image reference parsing
//!
//! Only the pieces reconciliation needs: the repository part, the tag and an
//! optional digest. A `:` counts as a tag separator only when it follows the
//! last `/`, so registry ports (`registry:5000/org/app`) are not mistaken for
//! tags.

/// Tag reported when an image reference carries none
pub const DEFAULT_TAG: &str = "latest";

/// Parsed components of an image reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef<'a> {
    /// Repository without tag or digest (e.g., "quay.io/org/app")
    pub repository: &'a str,
    /// Tag, when present (e.g., "1.0.0")
    pub tag: Option<&'a str>,
    /// Digest, when present (e.g., "sha256:abc")
    pub digest: Option<&'a str>,
}

impl<'a> ImageRef<'a> {
    /// Tag of this reference, or [`DEFAULT_TAG`] when absent
    pub fn tag_or_default(&self) -> &'a str {
        self.tag.unwrap_or(DEFAULT_TAG)
    }
}

/// Split an image reference into repository, tag and digest
pub fn parse(image: &str) -> ImageRef<'_> {
    let (without_digest, digest) = match image.split_once('@') {
        Some((head, digest)) if !digest.is_empty() => (head, Some(digest)),
        Some((head, _)) => (head, None),
        None => (image, None),
    };

    let last_slash = without_digest.rfind('/');
    let tag_split = without_digest
        .rfind(':')
        .filter(|colon| last_slash.map_or(true, |slash| *colon > slash));

    match tag_split {
        Some(colon) => ImageRef {
            repository: &without_digest[..colon],
            tag: Some(&without_digest[colon + 1..]),
            digest,
        },
        None => ImageRef {
            repository: without_digest,
            tag: None,
            digest,
        },
    }
}

/// Extract the tag of an image reference, `"latest"` when there is none
pub fn extract_tag(image: &str) -> &str {
    parse(image).tag_or_default()
}

/// Replace the tag of an image reference
///
/// Any digest is dropped in favour of the new tag.
pub fn replace_tag(image: &str, new_tag: &str) -> String {
    format!("{}:{}", parse(image).repository, new_tag)
}
