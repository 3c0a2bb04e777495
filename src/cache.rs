use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of a cache key string.
pub fn content_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// On-disk cache for generated assets, keyed by content hash so identical
/// requests never hit the network twice. Audio and images live in separate
/// subdirectories.
pub struct Cache {
    audio_dir: PathBuf,
    image_dir: PathBuf,
}

impl Cache {
    pub fn open(root: &Path) -> Result<Self> {
        let audio_dir = root.join("Audio");
        let image_dir = root.join("Images");
        std::fs::create_dir_all(&audio_dir)
            .with_context(|| format!("failed to create cache dir '{}'", audio_dir.display()))?;
        std::fs::create_dir_all(&image_dir)
            .with_context(|| format!("failed to create cache dir '{}'", image_dir.display()))?;
        Ok(Self {
            audio_dir,
            image_dir,
        })
    }

    pub fn audio(&self, key: &str) -> Option<Vec<u8>> {
        std::fs::read(self.audio_path(key)).ok()
    }

    pub fn store_audio(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.audio_path(key);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write audio cache '{}'", path.display()))
    }

    pub fn image(&self, key: &str) -> Option<Vec<u8>> {
        std::fs::read(self.image_path(key)).ok()
    }

    /// Stores image bytes and returns the cached file path, which doubles as
    /// the background path rendered from.
    pub fn store_image(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.image_path(key);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write image cache '{}'", path.display()))?;
        Ok(path)
    }

    pub fn image_path(&self, key: &str) -> PathBuf {
        self.image_dir.join(format!("{}.png", content_hash(key)))
    }

    fn audio_path(&self, key: &str) -> PathBuf {
        self.audio_dir.join(format!("{}.mp3", content_hash(key)))
    }

    pub fn clear(&self) -> Result<()> {
        for dir in [&self.audio_dir, &self.image_dir] {
            for entry in std::fs::read_dir(dir)
                .with_context(|| format!("failed to list cache dir '{}'", dir.display()))?
            {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex() {
        let a = content_hash("audio_ja-JP-Neural2-B_hello");
        let b = content_hash("audio_ja-JP-Neural2-B_hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, content_hash("audio_ja-JP-Neural2-B_hello!"));
    }

    #[test]
    fn audio_round_trips_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        assert!(cache.audio("k").is_none());
        cache.store_audio("k", b"mp3 bytes").unwrap();
        assert_eq!(cache.audio("k").unwrap(), b"mp3 bytes");
    }

    #[test]
    fn image_store_returns_the_cached_path() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let path = cache.store_image("prompt", b"png bytes").unwrap();
        assert_eq!(path, cache.image_path("prompt"));
        assert_eq!(std::fs::read(path).unwrap(), b"png bytes");
        assert_eq!(cache.image("prompt").unwrap(), b"png bytes");
    }

    #[test]
    fn clear_empties_both_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        cache.store_audio("a", b"x").unwrap();
        cache.store_image("b", b"y").unwrap();
        cache.clear().unwrap();
        assert!(cache.audio("a").is_none());
        assert!(cache.image("b").is_none());
    }
}
