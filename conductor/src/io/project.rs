//! Project inventory: files, images and recent changes inside the sandbox.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::types::is_image_path;

/// Changes kept in memory.
pub const CHANGES_RETAINED: usize = 20;
/// Changes surfaced in snapshots and prompts.
pub const CHANGES_SURFACED: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentChange {
    pub command: String,
    pub args: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RecentChange {
    pub fn describe(&self) -> String {
        format!(
            "{} {}({})",
            self.timestamp.format("%H:%M:%S"),
            self.command,
            self.args.join(", ")
        )
    }
}

/// Immutable view of the project handed to agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectSnapshot {
    pub version: u64,
    pub files: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
    pub recent_changes: Vec<RecentChange>,
}

impl ProjectSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Files: {}, Images: {}, Recent changes: {}",
            self.files.len(),
            self.images.len(),
            self.recent_changes.len()
        )
    }
}

/// Lazily rebuilt project inventory.
///
/// Mutations only set a dirty flag; the next [`ProjectContext::snapshot`]
/// rescans the sandbox and bumps the version.
#[derive(Debug)]
pub struct ProjectContext {
    root: PathBuf,
    dirty: bool,
    changes: VecDeque<RecentChange>,
    snapshot: ProjectSnapshot,
}

impl ProjectContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirty: true,
            changes: VecDeque::new(),
            snapshot: ProjectSnapshot::default(),
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record a successful mutating operation.
    pub fn record_change(&mut self, command: &str, args: Vec<String>) {
        self.changes.push_back(RecentChange {
            command: command.to_string(),
            args,
            timestamp: Utc::now(),
        });
        while self.changes.len() > CHANGES_RETAINED {
            self.changes.pop_front();
        }
        self.dirty = true;
    }

    /// Current snapshot, rescanning first when dirty.
    pub fn snapshot(&mut self) -> Result<&ProjectSnapshot> {
        if self.dirty {
            let (files, images) = scan(&self.root)?;
            let skip = self.changes.len().saturating_sub(CHANGES_SURFACED);
            self.snapshot = ProjectSnapshot {
                version: self.snapshot.version + 1,
                files,
                images,
                recent_changes: self.changes.iter().skip(skip).cloned().collect(),
            };
            self.dirty = false;
            debug!(
                version = self.snapshot.version,
                files = self.snapshot.files.len(),
                images = self.snapshot.images.len(),
                "rebuilt project snapshot"
            );
        }
        Ok(&self.snapshot)
    }
}

/// Sorted relative paths of regular files under `root`, split into text files and images.
fn scan(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut images = Vec::new();
    if !root.exists() {
        return Ok((files, images));
    }
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scan {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        if is_image_path(&rel) {
            images.push(rel);
        } else {
            files.push(rel);
        }
    }
    Ok((files, images))
}
