//! Content-addressed cache for extracted and built payloads.
//!
//! Maps a SHA-256 content hash to its bytes on disk. Writes are
//! temp-then-rename and idempotent: storing bytes that already exist is a
//! no-op, which is what makes re-extraction of unchanged items free.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Content-addressed store rooted at a directory.
///
/// Entries are sharded by the first two hash characters
/// (`<root>/ab/abcdef....bin`) to keep directories small.
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Open (creating if needed) a cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create cache dir: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        let shard = &hash[..hash.len().min(2)];
        self.root.join(shard).join(format!("{hash}.bin"))
    }

    /// Whether bytes for `hash` are present.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.entry_path(hash).is_file()
    }

    /// Store `bytes` under `hash`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let path = self.entry_path(hash);
        if path.is_file() {
            return Ok(());
        }
        let parent = path
            .parent()
            .context("cache entry path has no parent")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache shard: {}", parent.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create cache temp file")?;
        tmp.write_all(bytes).context("Failed to write cache entry")?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to commit cache entry: {}", path.display()))?;
        Ok(())
    }

    /// Load the bytes for `hash`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure other than absence.
    pub fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.entry_path(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read cache entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteferry_types::asset::content_hash;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();

        let bytes = b"<html>hello</html>";
        let hash = content_hash(bytes);
        assert!(!cache.contains(&hash));

        cache.put(&hash, bytes).unwrap();
        assert!(cache.contains(&hash));
        assert_eq!(cache.get(&hash).unwrap().unwrap(), bytes);
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();

        let bytes = b"body { margin: 0 }";
        let hash = content_hash(bytes);
        cache.put(&hash, bytes).unwrap();
        cache.put(&hash, bytes).unwrap();
        assert_eq!(cache.get(&hash).unwrap().unwrap(), bytes);
    }

    #[test]
    fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();
        assert!(cache.get(&content_hash(b"nothing")).unwrap().is_none());
    }

    #[test]
    fn entries_are_sharded_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();

        let bytes = b"payload";
        let hash = content_hash(bytes);
        cache.put(&hash, bytes).unwrap();
        assert!(dir.path().join(&hash[..2]).is_dir());
    }
}
