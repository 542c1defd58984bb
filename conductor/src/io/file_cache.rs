//! File content cache keyed by modification time.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
enum Cached {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Default)]
pub struct FileCache {
    entries: HashMap<PathBuf, (SystemTime, Cached)>,
}

impl FileCache {
    /// First `max_chars` characters of a text file (invalid UTF-8 replaced).
    pub fn text(&mut self, path: &Path, max_chars: usize) -> Result<String> {
        let mtime = modified(path)?;
        if let Some((cached_at, Cached::Text(text))) = self.entries.get(path)
            && *cached_at == mtime
        {
            return Ok(text.clone());
        }
        let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        // Four bytes per char covers any UTF-8 prefix of max_chars characters.
        let mut buf = Vec::new();
        file.by_ref()
            .take((max_chars as u64).saturating_mul(4))
            .read_to_end(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        let text: String = String::from_utf8_lossy(&buf).chars().take(max_chars).collect();
        self.entries
            .insert(path.to_path_buf(), (mtime, Cached::Text(text.clone())));
        Ok(text)
    }

    /// Whole file bytes, for images attached to prompts.
    pub fn bytes(&mut self, path: &Path) -> Result<Vec<u8>> {
        let mtime = modified(path)?;
        if let Some((cached_at, Cached::Binary(bytes))) = self.entries.get(path)
            && *cached_at == mtime
        {
            return Ok(bytes.clone());
        }
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        self.entries
            .insert(path.to_path_buf(), (mtime, Cached::Binary(bytes.clone())));
        Ok(bytes)
    }

    /// Drop entries for files that no longer exist.
    pub fn prune(&mut self) {
        self.entries.retain(|path, _| path.exists());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("stat {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn text_is_capped_and_refreshed_on_mtime_change() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a.txt");
        fs::write(&path, "héllo world").expect("write");

        let mut cache = FileCache::default();
        assert_eq!(cache.text(&path, 5).expect("text"), "héllo");

        fs::write(&path, "changed").expect("write");
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_modified(later))
            .expect("touch");
        assert_eq!(cache.text(&path, 5).expect("text"), "chang");
    }

    #[test]
    fn prune_forgets_deleted_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("img.png");
        fs::write(&path, [1u8, 2, 3]).expect("write");
        let mut cache = FileCache::default();
        assert_eq!(cache.bytes(&path).expect("bytes"), vec![1, 2, 3]);
        fs::remove_file(&path).expect("remove");
        cache.prune();
        assert!(cache.is_empty());
    }
}
