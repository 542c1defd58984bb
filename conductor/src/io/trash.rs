//! Trash area for discarded artifacts. Nothing here is ever purged.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Trash {
    dir: PathBuf,
}

impl Trash {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move `path` into the trash under a timestamped name and return the new location.
    pub fn discard(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create trash {}", self.dir.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut target = self.dir.join(format!("{stamp}-{name}"));
        let mut n = 1;
        while target.exists() {
            target = self.dir.join(format!("{stamp}-{n}-{name}"));
            n += 1;
        }

        if let Err(err) = fs::rename(path, &target) {
            // Cross-device moves fall back to copy + remove.
            warn!(err = %err, from = %path.display(), "rename into trash failed, copying");
            fs::copy(path, &target)
                .with_context(|| format!("copy {} to trash", path.display()))?;
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        }
        debug!(from = %path.display(), to = %target.display(), "moved to trash");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_moves_without_deleting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("vm/variant.png");
        fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
        fs::write(&file, b"img").expect("write");

        let trash = Trash::new(temp.path().join("vm-trash"));
        let first = trash.discard(&file).expect("discard");
        assert!(!file.exists());
        assert_eq!(fs::read(&first).expect("read"), b"img");

        fs::write(&file, b"img2").expect("write");
        let second = trash.discard(&file).expect("discard");
        assert_ne!(first, second);
        assert!(first.exists());
    }
}
