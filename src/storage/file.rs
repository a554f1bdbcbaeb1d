use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{CacheEntry, CacheError, CacheStore};

/// Cache store backed by a single JSON document on disk.
///
/// Writes go to a uniquely named temporary file in the same directory, are
/// synced, then renamed over the target. Readers see the old document or the
/// new one, never a partial write.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for FileStore {
    fn get(&self) -> Result<Option<CacheEntry>, CacheError> {
        let content = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }

    fn set(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let json = serde_json::to_vec(entry)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        atomic_write(&self.path, &json)?;
        tracing::debug!(
            path = %self.path.display(),
            posts = entry.posts.len(),
            bytes = json.len(),
            "Cache written"
        );
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

/// Writes `content` to `dst` using write-to-temp-then-rename.
fn atomic_write(dst: &Path, content: &[u8]) -> std::io::Result<()> {
    // Unpredictable temp name so a pre-placed symlink cannot be followed
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", suffix));

    let result = (|| {
        let mut temp_file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        temp_file.write_all(content)?;
        temp_file.sync_all()?;
        drop(temp_file);

        // Windows refuses to rename over an existing file
        #[cfg(windows)]
        if dst.exists() {
            std::fs::remove_file(dst)?;
        }

        std::fs::rename(&temp_path, dst)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Post;
    use chrono::{DateTime, Utc};

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("folio_feed_file_store_{name}"));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    fn sample_entry() -> CacheEntry {
        let post = Post {
            title: "Cached".into(),
            link: "https://example.com/p/cached".into(),
            published_at: "Sat, 26 Jul 2025 14:03:00 GMT".into(),
            author: "Author".into(),
            content: "<p>Body</p>".into(),
            summary: "Body".into(),
            guid: "cached-1".into(),
            categories: vec!["notes".into()],
            enclosure: None,
        };
        let fetched_at = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        CacheEntry::new(vec![post], fetched_at)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = test_dir("missing");
        let store = FileStore::new(dir.join("cache.json"));
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn test_set_then_get() {
        let dir = test_dir("roundtrip");
        let store = FileStore::new(dir.join("nested").join("cache.json"));
        let entry = sample_entry();

        store.set(&entry).unwrap();
        assert_eq!(store.get().unwrap(), Some(entry));

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.join("nested"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains("tmp."))
            .collect();
        assert!(leftovers.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_overwrite_replaces_document() {
        let dir = test_dir("overwrite");
        let store = FileStore::new(dir.join("cache.json"));

        store.set(&sample_entry()).unwrap();
        let replacement = CacheEntry::new(Vec::new(), sample_entry().fetched_at);
        store.set(&replacement).unwrap();

        assert_eq!(store.get().unwrap(), Some(replacement));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_document_is_error() {
        let dir = test_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = FileStore::new(&path).get();
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = test_dir("clear");
        let store = FileStore::new(dir.join("cache.json"));
        store.set(&sample_entry()).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
