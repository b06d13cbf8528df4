//! SHA-256 content checksums for the download short-circuit.
//!
//! Hashing a large asset on every `OPEN` would be wasteful, so
//! [`CachedChecksums`] remembers the digest per path together with the
//! file's length and modification time, and only rehashes when either
//! changes (or when the path is explicitly invalidated after an upload).

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::application::transfer::ChecksumProvider;

const READ_BUFFER: usize = 64 * 1024;

/// Streams the file through SHA-256 and returns lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Checksum;

impl ChecksumProvider for Sha256Checksum {
    fn checksum(&mut self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Stamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl Stamp {
    fn of(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Memoizes another provider, keyed by path, length and mtime.
#[derive(Debug, Default)]
pub struct CachedChecksums<P> {
    inner: P,
    cache: HashMap<PathBuf, (Stamp, String)>,
}

impl<P: ChecksumProvider> CachedChecksums<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl<P: ChecksumProvider> ChecksumProvider for CachedChecksums<P> {
    fn checksum(&mut self, path: &Path) -> io::Result<String> {
        let stamp = Stamp::of(path)?;
        if let Some((seen, digest)) = self.cache.get(path) {
            if *seen == stamp {
                return Ok(digest.clone());
            }
        }
        let digest = self.inner.checksum(path)?;
        debug!("checksum of {} is {digest}", path.display());
        self.cache.insert(path.to_path_buf(), (stamp, digest.clone()));
        Ok(digest)
    }

    fn invalidate(&mut self, path: &Path) {
        self.cache.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_file(contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("depot_sum_{}.bin", Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Counts how often the wrapped provider really hashes.
    #[derive(Default)]
    struct Counting {
        calls: usize,
    }

    impl ChecksumProvider for Counting {
        fn checksum(&mut self, _path: &Path) -> io::Result<String> {
            self.calls += 1;
            Ok(format!("sum{}", self.calls))
        }
    }

    #[test]
    fn test_sha256_of_known_input() {
        let path = temp_file(b"abc");
        let digest = Sha256Checksum.checksum(&path).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sha256_of_missing_file_is_error() {
        let path = std::env::temp_dir().join(format!("depot_nope_{}", Uuid::new_v4()));
        assert!(Sha256Checksum.checksum(&path).is_err());
    }

    #[test]
    fn test_cache_reuses_digest_until_file_changes() {
        // Arrange
        let path = temp_file(b"one");
        let mut cached = CachedChecksums::new(Counting::default());

        // Act
        let first = cached.checksum(&path).unwrap();
        let again = cached.checksum(&path).unwrap();
        std::fs::write(&path, b"three").unwrap();
        let changed = cached.checksum(&path).unwrap();

        // Assert
        assert_eq!(first, again);
        assert_ne!(first, changed, "length change forces a rehash");
        assert_eq!(cached.inner.calls, 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalidate_forces_rehash() {
        let path = temp_file(b"same");
        let mut cached = CachedChecksums::new(Counting::default());
        cached.checksum(&path).unwrap();

        cached.invalidate(&path);
        cached.checksum(&path).unwrap();

        assert_eq!(cached.inner.calls, 2);
        assert_eq!(cached.cached(), 1);
        std::fs::remove_file(&path).ok();
    }
}
