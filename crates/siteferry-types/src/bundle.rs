//! Deployable bundle manifest.
//!
//! A [`Bundle`] is the deterministic output of transforming an extracted
//! asset set: an ordered manifest of deployable files, each tagged with the
//! content hashes of the assets it was derived from. File bytes live in the
//! content-addressed cache keyed by each entry's `content_hash`; the
//! manifest itself is what the job state persists.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One deployable file in the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    /// Final path relative to the web root (e.g. `"assets/static/ab12cd34.css"`).
    pub path: String,
    /// SHA-256 hex digest over this file's bytes.
    pub content_hash: String,
    /// Content hashes of the source asset(s) this file was derived from.
    pub source_hashes: Vec<String>,
}

/// Ordered manifest of deployable files plus a digest over the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub files: Vec<BundleFile>,
    /// Digest over the ordered `(path, content_hash)` pairs. Two bundles
    /// built from identical asset sets must have equal hashes.
    pub bundle_hash: String,
    /// RFC 3339 UTC timestamp of the build.
    pub built_at: String,
}

impl Bundle {
    /// Assemble a bundle from already-ordered files, computing `bundle_hash`.
    #[must_use]
    pub fn new(files: Vec<BundleFile>, built_at: String) -> Self {
        let bundle_hash = Self::hash_files(&files);
        Self {
            files,
            bundle_hash,
            built_at,
        }
    }

    /// Digest over the ordered `(path, content_hash)` pairs.
    #[must_use]
    pub fn hash_files(files: &[BundleFile]) -> String {
        let mut hasher = Sha256::new();
        for file in files {
            hasher.update(file.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(file.content_hash.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Sorted, deduplicated set of source hashes across all files.
    #[must_use]
    pub fn source_hash_set(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self
            .files
            .iter()
            .flat_map(|f| f.source_hashes.iter().cloned())
            .collect();
        hashes.sort_unstable();
        hashes.dedup();
        hashes
    }
}
