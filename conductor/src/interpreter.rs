//! Command interpreter: turns agent text into sandboxed operations.
//!
//! Commands are parsed with a restricted literal grammar and executed one by
//! one. A failing command never rolls back or blocks the ones after it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::command_parse::{ScannedSpan, scan_commands};
use crate::core::history::ErrorLog;
use crate::core::operations::{Operation, OperationKind, bind};
use crate::core::types::{OperationResult, PathChanged};
use crate::events::EventSink;
use crate::io::config::ProcessConfig;
use crate::io::llm::{GenerateRequest, LlmClient, collect};
use crate::io::preferences::PreferenceStore;
use crate::io::process::run_command_with_timeout;
use crate::io::project::ProjectContext;
use crate::io::sandbox::SandboxGateway;

/// Executes operations against one session's sandbox.
pub struct Interpreter<'s> {
    pub(crate) gateway: &'s SandboxGateway,
    pub(crate) preferences: &'s PreferenceStore,
    pub(crate) llm: &'s dyn LlmClient,
    pub(crate) process: &'s ProcessConfig,
    pub(crate) project: &'s mut ProjectContext,
    pub(crate) errors: &'s mut ErrorLog,
    pub(crate) events: &'s EventSink,
}

/// Result of one executed operation before bookkeeping.
struct Outcome {
    success: bool,
    message: String,
    side_effect: Option<PathChanged>,
}

impl Outcome {
    fn ok(message: impl Into<String>, side_effect: Option<PathChanged>) -> Self {
        Self {
            success: true,
            message: message.into(),
            side_effect,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            side_effect: None,
        }
    }
}

/// Operation with its path arguments resolved inside the sandbox.
enum Resolved {
    CreateFile { path: PathBuf, content: String },
    WriteFile { path: PathBuf, content: String },
    DeletePath { path: PathBuf },
    RenamePath { old: PathBuf, new: PathBuf },
    RunProcess { command_line: String },
    GenerateImage { path: PathBuf, prompt: String },
    SetPreference { key: String, value: String },
    GetPreference { key: String },
}

impl Interpreter<'_> {
    /// Parse and run every command in `text`, in order.
    #[instrument(skip_all, fields(text_len = text.len()))]
    pub fn execute_text(&mut self, text: &str) -> Vec<OperationResult> {
        let spans = scan_commands(text, OperationKind::is_registered);
        debug!(spans = spans.len(), "scanned agent text");
        let mut results = Vec::new();
        for span in spans {
            match span {
                ScannedSpan::Ignored { name, .. } => {
                    self.events
                        .system(format!("Unknown command ignored: {name}"));
                }
                ScannedSpan::SyntaxError {
                    source,
                    name,
                    error,
                } => {
                    let message = format!("Command syntax error in `{source}`: {error}");
                    results.push(self.fail(&name, message));
                }
                ScannedSpan::Call { source, call } => match bind(&call) {
                    Ok(op) => results.push(self.execute(op)),
                    Err(error) => {
                        let message = format!("Command syntax error in `{source}`: {error}");
                        results.push(self.fail(&call.name, message));
                    }
                },
            }
        }
        results
    }

    /// Run one bound operation, emitting events and recording changes.
    pub fn execute(&mut self, op: Operation) -> OperationResult {
        let kind = op.kind();
        let name = kind.name();
        let change_args = op.change_args();

        let resolved = match self.resolve(op) {
            Ok(resolved) => resolved,
            Err(message) => return self.fail(name, message),
        };
        let outcome = match self.run(resolved) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::failed(format!("Error running {name}: {err:#}")),
        };

        if !outcome.success {
            return self.fail(name, outcome.message);
        }
        self.events.system(outcome.message.clone());
        if let Some(change) = &outcome.side_effect {
            self.events.file_changed(change.path().clone());
        }
        if kind.is_mutating() {
            self.project.record_change(name, change_args);
        }
        OperationResult::ok(name, outcome.message, outcome.side_effect)
    }

    fn fail(&mut self, operation: &str, message: String) -> OperationResult {
        warn!(operation, message = %message, "operation failed");
        self.events.error(message.clone());
        self.errors.push(message.clone());
        OperationResult::failed(operation, message)
    }

    fn resolve(&self, op: Operation) -> Result<Resolved, String> {
        let path = |candidate: &str| {
            self.gateway
                .resolve(candidate)
                .map_err(|err| format!("Path rejected for {}: {err}", op_name(&op)))
        };
        let resolved = match &op {
            Operation::CreateFile { path: p, content } => Resolved::CreateFile {
                path: path(p)?,
                content: content.clone(),
            },
            Operation::WriteFile { path: p, content } => Resolved::WriteFile {
                path: path(p)?,
                content: content.clone(),
            },
            Operation::DeletePath { path: p } => Resolved::DeletePath { path: path(p)? },
            Operation::RenamePath { old, new } => Resolved::RenamePath {
                old: path(old)?,
                new: path(new)?,
            },
            Operation::RunProcess { command_line } => Resolved::RunProcess {
                command_line: command_line.clone(),
            },
            Operation::GenerateImage { path: p, prompt } => Resolved::GenerateImage {
                path: path(p)?,
                prompt: prompt.clone(),
            },
            Operation::SetPreference { key, value } => Resolved::SetPreference {
                key: key.clone(),
                value: value.clone(),
            },
            Operation::GetPreference { key } => Resolved::GetPreference { key: key.clone() },
        };
        Ok(resolved)
    }

    fn rel(&self, path: &Path) -> PathBuf {
        self.gateway.relative(path).to_path_buf()
    }

    fn run(&mut self, op: Resolved) -> Result<Outcome> {
        match op {
            Resolved::CreateFile { path, content } => {
                ensure_parent(&path)?;
                fs::write(&path, &content).with_context(|| format!("write {}", path.display()))?;
                let rel = self.rel(&path);
                Ok(Outcome::ok(
                    format!("Created file: {} ({} bytes)", rel.display(), content.len()),
                    Some(PathChanged::Created { path: rel }),
                ))
            }
            Resolved::WriteFile { path, content } => {
                let rel = self.rel(&path);
                if !path.is_file() {
                    return Ok(Outcome::failed(format!("File not found: {}", rel.display())));
                }
                let old_size = fs::metadata(&path)
                    .with_context(|| format!("stat {}", path.display()))?
                    .len();
                fs::write(&path, &content).with_context(|| format!("write {}", path.display()))?;
                Ok(Outcome::ok(
                    format!(
                        "Updated file: {} ({old_size} -> {} bytes)",
                        rel.display(),
                        content.len()
                    ),
                    Some(PathChanged::Written { path: rel }),
                ))
            }
            Resolved::DeletePath { path } => {
                let rel = self.rel(&path);
                let meta = match fs::symlink_metadata(&path) {
                    Ok(meta) => meta,
                    Err(_) => return Ok(Outcome::failed(format!("Path not found: {}", rel.display()))),
                };
                let message = if meta.is_dir() {
                    let file_count = WalkDir::new(&path)
                        .into_iter()
                        .filter_map(Result::ok)
                        .filter(|entry| entry.file_type().is_file())
                        .count();
                    fs::remove_dir_all(&path)
                        .with_context(|| format!("remove directory {}", path.display()))?;
                    format!("Deleted directory: {} ({file_count} files)", rel.display())
                } else {
                    fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
                    format!("Deleted file: {} ({} bytes)", rel.display(), meta.len())
                };
                Ok(Outcome::ok(message, Some(PathChanged::Deleted { path: rel })))
            }
            Resolved::RenamePath { old, new } => {
                let (from, to) = (self.rel(&old), self.rel(&new));
                if fs::symlink_metadata(&old).is_err() {
                    return Ok(Outcome::failed(format!("Path not found: {}", from.display())));
                }
                if fs::symlink_metadata(&new).is_ok() {
                    return Ok(Outcome::failed(format!(
                        "Destination already exists: {}",
                        to.display()
                    )));
                }
                ensure_parent(&new)?;
                fs::rename(&old, &new)
                    .with_context(|| format!("rename {} to {}", old.display(), new.display()))?;
                Ok(Outcome::ok(
                    format!("Renamed {} -> {}", from.display(), to.display()),
                    Some(PathChanged::Renamed { from, to }),
                ))
            }
            Resolved::RunProcess { command_line } => Ok(self.run_process(&command_line)),
            Resolved::GenerateImage { path, prompt } => self.generate_image(&path, &prompt),
            Resolved::SetPreference { key, value } => {
                self.preferences.set(&key, &value)?;
                Ok(Outcome::ok(format!("Preference set: {key} = {value}"), None))
            }
            Resolved::GetPreference { key } => {
                let message = match self.preferences.get(&key)? {
                    Some(value) => format!("Preference {key} = {value}"),
                    None => format!("Preference {key} is not set"),
                };
                Ok(Outcome::ok(message, None))
            }
        }
    }

    fn run_process(&mut self, command_line: &str) -> Outcome {
        if command_line.trim().is_empty() {
            return Outcome::failed("No command provided");
        }
        let Some(argv) = shlex::split(command_line) else {
            return Outcome::failed(format!("Unbalanced quotes in command: {command_line}"));
        };
        let Some((program, args)) = argv.split_first() else {
            return Outcome::failed("No command provided");
        };

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(self.gateway.root());
        let timeout = self.process.timeout();
        let output = match run_command_with_timeout(cmd, None, timeout, self.process.output_limit_bytes)
        {
            Ok(output) => output,
            Err(err) => return Outcome::failed(format!("Command execution error: {err:#}")),
        };
        // Processes may touch any file in the sandbox.
        self.project.mark_dirty();

        if output.timed_out {
            return Outcome::failed(format!(
                "Command timed out after {} seconds: {command_line}",
                timeout.as_secs()
            ));
        }

        let mut message = format!(
            "Command: {command_line}\nExecution time: {:.2}s\n",
            output.elapsed.as_secs_f64()
        );
        let stdout = output.stdout_lossy();
        if !stdout.trim().is_empty() {
            message.push_str(&format!("STDOUT:\n{}\n", stdout.trim_end()));
        }
        let stderr = output.stderr_lossy();
        if !stderr.trim().is_empty() {
            message.push_str(&format!("STDERR:\n{}\n", stderr.trim_end()));
            self.errors.push(format!("Command stderr: {}", stderr.trim()));
        }
        match output.status.code() {
            Some(0) => {
                message.push_str("Exit code: 0");
                Outcome::ok(message, None)
            }
            Some(code) => {
                message.push_str(&format!("Command failed with exit code: {code}"));
                Outcome::failed(message)
            }
            None => {
                message.push_str("Command terminated by signal");
                Outcome::failed(message)
            }
        }
    }

    fn generate_image(&mut self, path: &Path, prompt: &str) -> Result<Outcome> {
        let rel = self.rel(path);
        self.events
            .system(format!("Generating image: {}", rel.display()));
        self.events.system(format!("Prompt: {prompt}"));

        let generated = match collect(self.llm, &GenerateRequest::image(prompt), &mut |_| {}) {
            Ok(generated) => generated,
            Err(err) => return Ok(Outcome::failed(format!("Image generation failed: {err:#}"))),
        };
        let Some((_, bytes)) = generated
            .binaries
            .into_iter()
            .find(|(mime, _)| mime.starts_with("image/"))
        else {
            return Ok(Outcome::failed("No image data received from the model"));
        };
        if bytes.is_empty() {
            return Err(anyhow!("model returned an empty image"));
        }
        ensure_parent(path)?;
        fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
        Ok(Outcome::ok(
            format!("Image generated: {} ({} bytes)", rel.display(), bytes.len()),
            Some(PathChanged::Generated { path: rel }),
        ))
    }
}

fn op_name(op: &Operation) -> &'static str {
    op.kind().name()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, Event};
    use crate::io::llm::Chunk;
    use std::sync::mpsc::Receiver;

    struct ImageBackend(Vec<u8>);

    impl LlmClient for ImageBackend {
        fn generate(&self, _: &GenerateRequest, on_chunk: &mut dyn FnMut(Chunk)) -> Result<()> {
            on_chunk(Chunk::InlineBinary {
                mime: "image/png".into(),
                data: self.0.clone(),
            });
            Ok(())
        }
    }

    struct Rig {
        _temp: tempfile::TempDir,
        gateway: SandboxGateway,
        preferences: PreferenceStore,
        llm: ImageBackend,
        process: ProcessConfig,
        project: ProjectContext,
        errors: ErrorLog,
        sink: EventSink,
        rx: Receiver<Event>,
    }

    impl Rig {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let gateway = SandboxGateway::new(temp.path().join("vm")).expect("gateway");
            let preferences = PreferenceStore::new(temp.path().join("prefs.json"));
            let project = ProjectContext::new(gateway.root());
            let (sink, rx) = events::channel();
            Self {
                _temp: temp,
                gateway,
                preferences,
                llm: ImageBackend(vec![137, 80, 78, 71]),
                process: ProcessConfig::default(),
                project,
                errors: ErrorLog::default(),
                sink,
                rx,
            }
        }

        fn run(&mut self, text: &str) -> Vec<OperationResult> {
            Interpreter {
                gateway: &self.gateway,
                preferences: &self.preferences,
                llm: &self.llm,
                process: &self.process,
                project: &mut self.project,
                errors: &mut self.errors,
                events: &self.sink,
            }
            .execute_text(text)
        }

        fn events(&self) -> Vec<Event> {
            self.rx.try_iter().collect()
        }
    }

    #[test]
    fn create_file_writes_exact_bytes() {
        let mut rig = Rig::new();
        let results = rig.run("`create_file('hello.py', 'print(1)')`");
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        let written = fs::read(rig.gateway.root().join("hello.py")).expect("read");
        assert_eq!(written.len(), 8);
        assert_eq!(
            results[0].side_effect,
            Some(PathChanged::Created {
                path: "hello.py".into()
            })
        );
        assert!(rig.events().contains(&Event::FileChanged {
            path: "hello.py".into()
        }));
        assert_eq!(rig.project.snapshot().expect("snapshot").recent_changes.len(), 1);
    }

    #[test]
    fn unknown_command_is_reported_without_mutation() {
        let mut rig = Rig::new();
        let results = rig.run("`unknown_op('x')`");
        assert!(results.is_empty());
        let events = rig.events();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::System { message } if message.contains("Unknown command") && message.contains("unknown_op")
        )));
        assert_eq!(fs::read_dir(rig.gateway.root()).expect("ls").count(), 0);
    }

    #[test]
    fn traversal_is_rejected_and_later_commands_still_run() {
        let mut rig = Rig::new();
        let results = rig.run("`create_file('../evil.txt', 'x')` then `create_file('ok.txt', 'y')`");
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[0].message.contains("Path rejected"));
        assert!(results[1].success);
        assert!(!rig.gateway.root().join("../evil.txt").exists());
        assert_eq!(rig.errors.len(), 1);
    }

    #[test]
    fn legacy_names_and_write_sizes() {
        let mut rig = Rig::new();
        rig.run("`create_file('a.txt', 'abc')`");
        let results = rig.run("`write_to_file('a.txt', 'abcdef')`");
        assert_eq!(results[0].operation, "write_file");
        assert!(results[0].message.contains("(3 -> 6 bytes)"));

        let results = rig.run("`write_file('missing.txt', 'x')`");
        assert!(!results[0].success);
        assert!(results[0].message.contains("File not found"));
    }

    #[test]
    fn delete_and_rename() {
        let mut rig = Rig::new();
        rig.run("`create_file('dir/a.txt', 'a')` `create_file('dir/b.txt', 'b')` `create_file('c.txt', 'c')`");
        let results = rig.run("`delete_path('dir')` `rename_path('c.txt', 'moved/d.txt')`");
        assert!(results[0].message.contains("(2 files)"));
        assert!(results[1].success);
        assert!(rig.gateway.root().join("moved/d.txt").exists());
        assert!(!rig.gateway.root().join("dir").exists());
    }

    #[test]
    fn syntax_errors_are_skipped_not_evaluated() {
        let mut rig = Rig::new();
        let results = rig.run("`create_file(name, __import__('os'))`");
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].message.contains("syntax error"));
        assert_eq!(fs::read_dir(rig.gateway.root()).expect("ls").count(), 0);
    }

    #[test]
    fn preferences_round_trip() {
        let mut rig = Rig::new();
        let results = rig.run("`set_preference('theme', 'dark')` `get_preference('theme')`");
        assert_eq!(results[1].message, "Preference theme = dark");
    }

    #[test]
    fn generate_image_writes_model_bytes() {
        let mut rig = Rig::new();
        let results = rig.run("`generate_image('art/logo.png', 'a red fox')`");
        assert!(results[0].success, "{}", results[0].message);
        assert_eq!(
            fs::read(rig.gateway.root().join("art/logo.png")).expect("read"),
            vec![137, 80, 78, 71]
        );
        assert!(matches!(
            results[0].side_effect,
            Some(PathChanged::Generated { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn run_process_uses_argv_without_shell() {
        let mut rig = Rig::new();
        let results = rig.run("`run_process('echo hello && echo no-shell')`");
        assert!(results[0].success);
        assert!(results[0].message.contains("hello && echo no-shell"));
        assert!(results[0].message.contains("Exit code: 0"));

        let results = rig.run("`run_process('sh -c \"echo oops >&2; exit 2\"')`");
        assert!(!results[0].success);
        assert!(results[0].message.contains("exit code: 2"));
        assert!(rig.errors.recent(5).iter().any(|e| e.contains("oops")));
    }

    #[cfg(unix)]
    #[test]
    fn run_process_timeout_is_distinct() {
        let mut rig = Rig::new();
        rig.process.timeout_secs = 1;
        let results = rig.run("`run_process('sleep 3')`");
        assert!(!results[0].success);
        assert!(results[0].message.contains("timed out after 1 seconds"));
    }
}
