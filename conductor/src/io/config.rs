//! Conductor configuration stored in `conductor.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::grading::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "conductor.toml";

/// Conductor configuration (TOML).
///
/// Missing fields default to the values the orchestrator was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Directory every operation is confined to.
    pub sandbox_dir: PathBuf,

    /// Where discarded artifacts go. Defaults to a `<sandbox>-trash` sibling.
    pub trash_dir: Option<PathBuf>,

    /// JSON file backing `set_preference`/`get_preference`.
    pub preferences_path: PathBuf,

    /// Run the prompt enhancer before planning.
    pub enhancer_enabled: bool,

    pub grading: GradingConfig,
    pub planner: PlannerConfig,
    pub process: ProcessConfig,
    pub prompt: PromptConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GradingConfig {
    /// With grading off critics still run, but no retry decision is made.
    pub enabled: bool,
    pub passing_threshold: u8,
    pub max_attempts: u32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            enabled: true,
            passing_threshold: policy.passing_threshold,
            max_attempts: policy.max_attempts,
        }
    }
}

impl GradingConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            passing_threshold: self.passing_threshold,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Re-plan requests honored per turn before the directive is ignored.
    pub max_replans: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_replans: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    pub timeout_secs: u64,
    /// Truncate `run_process` stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

impl ProcessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Byte budget for rendered prompt text; droppable sections go first.
    pub budget_bytes: usize,
    /// Characters of each text file included in implementer prompts.
    pub file_char_limit: usize,
    pub history_entries: usize,
    pub history_entry_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 120_000,
            file_char_limit: 3000,
            history_entries: 8,
            history_entry_chars: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend command speaking the JSON-lines generate protocol.
    pub command: Vec<String>,
    pub text_model: String,
    pub image_model: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: vec!["conductor-llm".to_string()],
            text_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-2.0-flash-preview-image-generation".to_string(),
            timeout_secs: 300,
            output_limit_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: PathBuf::from("vm"),
            trash_dir: None,
            preferences_path: PathBuf::from("preferences.json"),
            enhancer_enabled: true,
            grading: GradingConfig::default(),
            planner: PlannerConfig::default(),
            process: ProcessConfig::default(),
            prompt: PromptConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sandbox_dir.as_os_str().is_empty() {
            return Err(anyhow!("sandbox_dir must not be empty"));
        }
        if self.grading.max_attempts == 0 {
            return Err(anyhow!("grading.max_attempts must be > 0"));
        }
        if self.grading.passing_threshold > 100 {
            return Err(anyhow!("grading.passing_threshold must be <= 100"));
        }
        if self.process.timeout_secs == 0 {
            return Err(anyhow!("process.timeout_secs must be > 0"));
        }
        if self.process.output_limit_bytes == 0 {
            return Err(anyhow!("process.output_limit_bytes must be > 0"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        if self.llm.command.is_empty() || self.llm.command[0].trim().is_empty() {
            return Err(anyhow!("llm.command must be a non-empty array"));
        }
        if let Some(trash) = &self.trash_dir
            && trash == &self.sandbox_dir
        {
            return Err(anyhow!("trash_dir must differ from sandbox_dir"));
        }
        Ok(())
    }

    /// Trash directory, defaulting to a sibling of the sandbox root.
    pub fn trash_dir(&self) -> PathBuf {
        if let Some(dir) = &self.trash_dir {
            return dir.clone();
        }
        let name = self
            .sandbox_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sandbox".to_string());
        self.sandbox_dir.with_file_name(format!("{name}-trash"))
    }

    /// Resolve relative paths against the directory holding the config file.
    pub fn rebase(mut self, base: &Path) -> Self {
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        self.sandbox_dir = join(&self.sandbox_dir);
        self.trash_dir = self.trash_dir.as_deref().map(join);
        self.preferences_path = join(&self.preferences_path);
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ConductorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conductor.toml");
        let mut cfg = ConductorConfig::default();
        cfg.grading.max_attempts = 5;
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conductor.toml");
        fs::write(&path, "sandbox_dir = \"work\"\n[grading]\nenabled = false\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.sandbox_dir, PathBuf::from("work"));
        assert!(!cfg.grading.enabled);
        assert_eq!(cfg.grading.max_attempts, 3);
        assert_eq!(cfg.process.timeout_secs, 120);
    }

    #[test]
    fn trash_defaults_to_sandbox_sibling() {
        let cfg = ConductorConfig {
            sandbox_dir: PathBuf::from("/work/vm"),
            ..ConductorConfig::default()
        };
        assert_eq!(cfg.trash_dir(), PathBuf::from("/work/vm-trash"));
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut cfg = ConductorConfig::default();
        cfg.grading.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
