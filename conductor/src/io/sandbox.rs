//! Path gateway confining every operation to the sandbox root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),
    #[error("path escapes the sandbox: {0}")]
    Traversal(String),
    #[error("path names the sandbox root itself: {0}")]
    Root(String),
    #[error("path resolves outside the sandbox through a link: {0}")]
    LinkEscape(String),
    #[error("cannot inspect {path}: {reason}")]
    Inspect { path: String, reason: String },
}

/// Resolves agent-supplied relative paths under a fixed root.
#[derive(Debug, Clone)]
pub struct SandboxGateway {
    /// Canonical sandbox root.
    root: PathBuf,
}

impl SandboxGateway {
    /// Create the root if needed and pin its canonical form.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create sandbox {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize sandbox {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `candidate` to an absolute path under the root.
    ///
    /// The result may not exist yet; callers create parents.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf, PathError> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        let raw = Path::new(trimmed);
        if raw.is_absolute() || raw.has_root() {
            return Err(PathError::Absolute(candidate.to_string()));
        }

        let mut depth = 0usize;
        let mut resolved = self.root.clone();
        for component in raw.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                // Any parent segment is refused, even one that stays inside.
                Component::ParentDir => return Err(PathError::Traversal(candidate.to_string())),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute(candidate.to_string()));
                }
            }
        }

        if depth == 0 {
            return Err(PathError::Root(candidate.to_string()));
        }
        self.check_links(&resolved, candidate)?;
        debug!(candidate, resolved = %resolved.display(), "resolved sandbox path");
        Ok(resolved)
    }

    /// The nearest existing ancestor must canonicalize inside the root.
    fn check_links(&self, resolved: &Path, candidate: &str) -> Result<(), PathError> {
        let mut probe = resolved;
        loop {
            match fs::symlink_metadata(probe) {
                Ok(_) => break,
                Err(err) if err.kind() == io::ErrorKind::NotFound => match probe.parent() {
                    Some(parent) => probe = parent,
                    None => return Ok(()),
                },
                Err(err) => {
                    return Err(PathError::Inspect {
                        path: candidate.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        let canonical = match probe.canonicalize() {
            Ok(path) => path,
            // Dangling link: judge by where it points.
            Err(_) => match fs::read_link(probe) {
                Ok(target) => {
                    let base = probe.parent().unwrap_or(&self.root);
                    lexical_join(base, &target)
                }
                Err(err) => {
                    return Err(PathError::Inspect {
                        path: candidate.to_string(),
                        reason: err.to_string(),
                    });
                }
            },
        };
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(PathError::LinkEscape(candidate.to_string()))
        }
    }

    /// Path relative to the root, for messages and inventories.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

fn lexical_join(base: &Path, target: &Path) -> PathBuf {
    let mut out = if target.is_absolute() {
        PathBuf::new()
    } else {
        base.to_path_buf()
    };
    for component in target.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> (tempfile::TempDir, SandboxGateway) {
        let temp = tempfile::tempdir().expect("tempdir");
        let gw = SandboxGateway::new(temp.path().join("vm")).expect("gateway");
        (temp, gw)
    }

    #[test]
    fn descendants_resolve_under_root() {
        let (_temp, gw) = gateway();
        let path = gw.resolve("src/./main.py").expect("resolve");
        assert_eq!(path, gw.root().join("src/main.py"));
        let path = gw.resolve("notes..txt").expect("resolve");
        assert_eq!(path, gw.root().join("notes..txt"));
    }

    #[test]
    fn rejects_empty_rooted_and_traversal() {
        let (_temp, gw) = gateway();
        assert_eq!(gw.resolve("  "), Err(PathError::Empty));
        assert!(matches!(gw.resolve("/etc/passwd"), Err(PathError::Absolute(_))));
        assert!(matches!(gw.resolve("../evil.txt"), Err(PathError::Traversal(_))));
        assert!(matches!(gw.resolve("a/../../evil.txt"), Err(PathError::Traversal(_))));
        assert!(matches!(gw.resolve("./."), Err(PathError::Root(_))));
    }

    #[test]
    fn rejects_parent_segments_that_stay_inside() {
        let (_temp, gw) = gateway();
        assert!(matches!(gw.resolve("a/../b.txt"), Err(PathError::Traversal(_))));
        assert!(matches!(gw.resolve("src/lib/../../main.py"), Err(PathError::Traversal(_))));
        assert!(matches!(gw.resolve("./a/.."), Err(PathError::Traversal(_))));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (temp, gw) = gateway();
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, gw.root().join("link")).expect("symlink");
        assert!(matches!(gw.resolve("link/x.txt"), Err(PathError::LinkEscape(_))));

        fs::create_dir_all(gw.root().join("inner")).expect("mkdir");
        std::os::unix::fs::symlink(gw.root().join("inner"), gw.root().join("ok")).expect("symlink");
        assert!(gw.resolve("ok/new.txt").is_ok());
    }
}
