//! Content-addressed large-object cache
//!
//! Payloads above a size threshold are written once under their SHA-256
//! digest and referenced as `cache:sha256:<hex>` instead of being sent
//! inline.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Prefix of an externalized payload reference.
pub const REFERENCE_PREFIX: &str = "cache:sha256:";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no cached object for digest {0}")]
    Missing(String),
    #[error("malformed cache reference: {0}")]
    BadReference(String),
    #[error("cached object {0} is corrupt")]
    Corrupt(String),
}

#[derive(Debug, Clone)]
pub struct LargeObjectCache {
    root: PathBuf,
    threshold: usize,
}

impl LargeObjectCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, threshold: usize) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root, threshold })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        // Two-character fanout keeps directories small.
        let (prefix, rest) = digest.split_at(2.min(digest.len()));
        self.root.join(prefix).join(rest)
    }

    /// Store `data` and return its hex digest. Writing an existing object is
    /// a no-op.
    pub fn put(&self, data: &[u8]) -> Result<String, CacheError> {
        let digest = hex_digest(data);
        let path = self.path_for(&digest);
        if path.exists() {
            return Ok(digest);
        }
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        // Write to a temp file in the same directory, then rename into place
        // so readers never observe a partial object.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(data).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        if let Err(err) = tmp.persist(&path) {
            // A concurrent writer may have won the race with identical content.
            if !path.exists() {
                return Err(io_err(err.error));
            }
        }
        tracing::debug!(digest = %digest, bytes = data.len(), "Stored large object");
        Ok(digest)
    }

    pub fn get(&self, digest: &str) -> Result<Vec<u8>, CacheError> {
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CacheError::BadReference(digest.to_string()));
        }
        let path = self.path_for(digest);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Missing(digest.to_string()))
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        if hex_digest(&data) != digest {
            return Err(CacheError::Corrupt(digest.to_string()));
        }
        Ok(data)
    }

    /// Replace `data` with a cache reference when it exceeds the threshold.
    pub fn externalize(&self, data: Vec<u8>) -> Result<Vec<u8>, CacheError> {
        if data.len() <= self.threshold {
            return Ok(data);
        }
        let digest = self.put(&data)?;
        Ok(format!("{REFERENCE_PREFIX}{digest}").into_bytes())
    }

    /// Inverse of [`externalize`](Self::externalize): inline payloads pass
    /// through unchanged.
    pub fn resolve(&self, data: Vec<u8>) -> Result<Vec<u8>, CacheError> {
        match reference_digest(&data) {
            Some(digest) => self.get(digest),
            None => Ok(data),
        }
    }
}

/// Digest named by a `cache:sha256:` reference, if `data` is one.
pub fn reference_digest(data: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(data).ok()?;
    text.strip_prefix(REFERENCE_PREFIX)
}

pub fn hex_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn small_payloads_stay_inline() {
        let dir = TempDir::new().unwrap();
        let cache = LargeObjectCache::open(dir.path(), 16).unwrap();
        let data = b"tiny".to_vec();
        assert_eq!(cache.externalize(data.clone()).unwrap(), data);
    }

    #[test]
    fn large_payloads_roundtrip_through_a_reference() {
        let dir = TempDir::new().unwrap();
        let cache = LargeObjectCache::open(dir.path(), 16).unwrap();
        let data = vec![7u8; 1024];

        let reference = cache.externalize(data.clone()).unwrap();
        let digest = reference_digest(&reference).unwrap().to_string();
        assert_eq!(digest, hex_digest(&data));
        assert!(dir.path().join(&digest[..2]).join(&digest[2..]).exists());

        assert_eq!(cache.resolve(reference).unwrap(), data);
    }

    #[test]
    fn storing_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = LargeObjectCache::open(dir.path(), 0).unwrap();
        let a = cache.put(b"same").unwrap();
        let b = cache.put(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_and_corrupt_objects_are_reported() {
        let dir = TempDir::new().unwrap();
        let cache = LargeObjectCache::open(dir.path(), 0).unwrap();
        let digest = hex_digest(b"never stored");
        assert!(matches!(cache.get(&digest), Err(CacheError::Missing(_))));

        let stored = cache.put(b"original").unwrap();
        fs::write(dir.path().join(&stored[..2]).join(&stored[2..]), b"tampered").unwrap();
        assert!(matches!(cache.get(&stored), Err(CacheError::Corrupt(_))));

        assert!(matches!(
            cache.get("not-a-digest"),
            Err(CacheError::BadReference(_))
        ));
    }
}
