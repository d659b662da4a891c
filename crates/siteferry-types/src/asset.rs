//! Extracted content units and content hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 of `bytes` as lowercase hex.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// What kind of thing an extracted item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Page,
    StaticResource,
    FormDefinition,
}

impl AssetKind {
    /// Directory segment used for this kind in the deployed path scheme.
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Page => "pages",
            Self::StaticResource => "static",
            Self::FormDefinition => "forms",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Page => "page",
            Self::StaticResource => "static_resource",
            Self::FormDefinition => "form_definition",
        };
        f.write_str(s)
    }
}

/// One extracted unit of the source site.
///
/// Identity is `(kind, source_path)`. Immutable once created; a
/// re-extraction that sees different bytes supersedes the record instead of
/// mutating it. Payload bytes are not stored here: they live in the
/// content-addressed cache keyed by `content_hash`, which makes the job
/// state's asset list an index over the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub kind: AssetKind,
    /// Path or URL of the item on the source platform.
    pub source_path: String,
    /// SHA-256 hex digest over the raw payload bytes.
    pub content_hash: String,
    pub size_bytes: u64,
    /// RFC 3339 UTC timestamp of the fetch.
    pub fetched_at: String,
}

impl Asset {
    /// Identity key: two assets with equal identity describe the same
    /// source item, possibly at different revisions.
    #[must_use]
    pub fn identity(&self) -> (AssetKind, &str) {
        (self.kind, &self.source_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash(b"hello");
        let b = content_hash(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(b"hello "));
    }

    #[test]
    fn identity_ignores_hash() {
        let a = Asset {
            kind: AssetKind::Page,
            source_path: "/about".into(),
            content_hash: "aa".into(),
            size_bytes: 10,
            fetched_at: "2026-08-01T00:00:00Z".into(),
        };
        let mut b = a.clone();
        b.content_hash = "bb".into();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn kind_path_segments() {
        assert_eq!(AssetKind::Page.path_segment(), "pages");
        assert_eq!(AssetKind::StaticResource.path_segment(), "static");
        assert_eq!(AssetKind::FormDefinition.path_segment(), "forms");
    }

    #[test]
    fn kind_serde_snake_case() {
        let json = serde_json::to_string(&AssetKind::StaticResource).unwrap();
        assert_eq!(json, "\"static_resource\"");
    }
}
