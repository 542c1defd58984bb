//! Durable user preferences: a flat string map in a JSON file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

pub type Preferences = BTreeMap<String, String>;

/// Last-write-wins preference store.
///
/// Every read-modify-write runs under one lock so hosts serving several
/// requests can share a store.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("preference lock poisoned"))?;
        Ok(load(&self.path)?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("preference lock poisoned"))?;
        let mut prefs = load(&self.path)?;
        prefs.insert(key.to_string(), value.to_string());
        save(&self.path, &prefs)?;
        debug!(key, "preference stored");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Preferences> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("preference lock poisoned"))?;
        load(&self.path)
    }
}

fn load(path: &Path) -> Result<Preferences> {
    if !path.exists() {
        return Ok(Preferences::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Preferences::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn save(path: &Path, prefs: &Preferences) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(prefs).context("serialize preferences")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp preferences {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace preferences {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_last_write_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = PreferenceStore::new(temp.path().join("prefs/preferences.json"));
        assert_eq!(store.get("theme").expect("get"), None);
        store.set("theme", "dark").expect("set");
        store.set("theme", "light").expect("set");
        assert_eq!(store.get("theme").expect("get").as_deref(), Some("light"));

        let reopened = PreferenceStore::new(store.path());
        assert_eq!(reopened.snapshot().expect("snapshot").len(), 1);
    }

    #[test]
    fn concurrent_writers_keep_every_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = std::sync::Arc::new(PreferenceStore::new(temp.path().join("p.json")));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.set(&format!("k{i}"), "v").expect("set"))
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(store.snapshot().expect("snapshot").len(), 8);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("p.json");
        fs::write(&path, "{not json").expect("write");
        assert!(PreferenceStore::new(&path).get("x").is_err());
    }
}
