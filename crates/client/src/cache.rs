//! Content-addressed level cache
//!
//! Files are cached on disk keyed by SHA-256, so reconnecting or walking
//! back through a door only downloads what changed. A level is
//! materialized into a per-level directory assembled from cached and
//! freshly fetched files; every fetched file is verified against the
//! manifest before anything is trusted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::ClientError;

pub struct LevelCache {
    objects_dir: PathBuf,
    levels_dir: PathBuf,
}

impl LevelCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, ClientError> {
        let objects_dir = root.join("objects");
        let levels_dir = root.join("levels");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&levels_dir)?;
        Ok(Self {
            objects_dir,
            levels_dir,
        })
    }

    /// A cached object by `(hash, size)`, if present and intact.
    pub fn lookup(&self, hash: &str, size: u64) -> Option<Vec<u8>> {
        let contents = fs::read(self.objects_dir.join(hash)).ok()?;
        if contents.len() as u64 != size {
            return None;
        }
        Some(contents)
    }

    /// Store one object; returns its hash.
    pub fn store(&self, contents: &[u8]) -> Result<String, ClientError> {
        let hash = hex::encode(Sha256::digest(contents));
        let path = self.objects_dir.join(&hash);
        if !path.exists() {
            fs::write(path, contents)?;
        }
        Ok(hash)
    }

    /// The manifest paths whose `(hash, size)` is not in the cache; this is
    /// exactly what `LEVEL_FILES_REQUEST` asks for.
    pub fn missing(&self, manifest: &BTreeMap<String, (String, u64)>) -> Vec<String> {
        manifest
            .iter()
            .filter(|(_, (hash, size))| self.lookup(hash, *size).is_none())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Assemble a level directory from the manifest, using `fetched` for
    /// anything the cache is missing. Every fetched file is verified
    /// against the manifest hash; a mismatch is a protocol error.
    pub fn materialize(
        &self,
        level: &str,
        manifest: &BTreeMap<String, (String, u64)>,
        fetched: &[(String, Bytes)],
    ) -> Result<PathBuf, ClientError> {
        let fetched: BTreeMap<&str, &Bytes> =
            fetched.iter().map(|(p, b)| (p.as_str(), b)).collect();

        let level_dir = self.levels_dir.join(level);
        if level_dir.exists() {
            fs::remove_dir_all(&level_dir)?;
        }
        fs::create_dir_all(&level_dir)?;

        for (path, (hash, size)) in manifest {
            if path.contains("..") || path.starts_with('/') {
                return Err(ClientError::Level(format!("unsafe path in manifest: {path}")));
            }
            let contents = match fetched.get(path.as_str()) {
                Some(bytes) => {
                    let got = hex::encode(Sha256::digest(bytes));
                    if got != *hash || bytes.len() as u64 != *size {
                        return Err(ClientError::Level(format!(
                            "hash mismatch for {path}: manifest {hash}, got {got}"
                        )));
                    }
                    self.store(bytes)?;
                    bytes.to_vec()
                }
                None => self.lookup(hash, *size).ok_or_else(|| {
                    ClientError::Level(format!("server did not send required file {path}"))
                })?,
            };

            let target = level_dir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, contents)?;
        }

        Ok(level_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest_for(files: &[(&str, &[u8])]) -> BTreeMap<String, (String, u64)> {
        files
            .iter()
            .map(|(path, contents)| {
                (
                    path.to_string(),
                    (
                        hex::encode(Sha256::digest(contents)),
                        contents.len() as u64,
                    ),
                )
            })
            .collect()
    }

    #[test]
    fn cold_cache_requests_everything() {
        let dir = TempDir::new().unwrap();
        let cache = LevelCache::open(dir.path()).unwrap();
        let manifest = manifest_for(&[("level.txt", b"###"), ("tiles.json", b"{}")]);
        assert_eq!(cache.missing(&manifest).len(), 2);
    }

    #[test]
    fn warm_cache_requests_only_the_delta() {
        let dir = TempDir::new().unwrap();
        let cache = LevelCache::open(dir.path()).unwrap();
        cache.store(b"###").unwrap();

        let manifest = manifest_for(&[("level.txt", b"###"), ("tiles.json", b"{}")]);
        assert_eq!(cache.missing(&manifest), vec!["tiles.json".to_string()]);
    }

    #[test]
    fn materialize_writes_and_caches() {
        let dir = TempDir::new().unwrap();
        let cache = LevelCache::open(dir.path()).unwrap();
        let manifest = manifest_for(&[("level.txt", b"###"), ("assets/a.ogg", b"ogg")]);

        let level_dir = cache
            .materialize(
                "main",
                &manifest,
                &[
                    ("level.txt".to_string(), Bytes::from_static(b"###")),
                    ("assets/a.ogg".to_string(), Bytes::from_static(b"ogg")),
                ],
            )
            .unwrap();

        assert_eq!(fs::read(level_dir.join("level.txt")).unwrap(), b"###");
        assert_eq!(fs::read(level_dir.join("assets/a.ogg")).unwrap(), b"ogg");
        // A rebuild afterwards needs nothing from the network
        assert!(cache.missing(&manifest).is_empty());
        let rebuilt = cache.materialize("main", &manifest, &[]).unwrap();
        assert_eq!(fs::read(rebuilt.join("level.txt")).unwrap(), b"###");
    }

    #[test]
    fn hash_mismatch_is_a_protocol_error() {
        let dir = TempDir::new().unwrap();
        let cache = LevelCache::open(dir.path()).unwrap();
        let manifest = manifest_for(&[("level.txt", b"###")]);

        let result = cache.materialize(
            "main",
            &manifest,
            &[("level.txt".to_string(), Bytes::from_static(b"tampered"))],
        );
        assert!(matches!(result, Err(ClientError::Level(_))));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cache = LevelCache::open(dir.path()).unwrap();
        let manifest = manifest_for(&[("level.txt", b"###")]);
        assert!(cache.materialize("main", &manifest, &[]).is_err());
    }

    #[test]
    fn unsafe_manifest_paths_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = LevelCache::open(dir.path()).unwrap();
        let mut manifest = BTreeMap::new();
        manifest.insert(
            "../escape".to_string(),
            (hex::encode(Sha256::digest(b"x")), 1u64),
        );
        assert!(cache
            .materialize("main", &manifest, &[("../escape".to_string(), Bytes::from_static(b"x"))])
            .is_err());
    }
}
