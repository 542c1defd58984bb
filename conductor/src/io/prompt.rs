//! Context builder: assembles per-call prompts for each agent role.
//!
//! Rendering is pure apart from the file-content cache. Text goes through one
//! template whose sections are marked required or droppable; droppable ones
//! are removed to fit the byte budget. Images are attached as binary parts.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use minijinja::{Environment, context};
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::debug;

use crate::core::history::{ConversationLog, clip};
use crate::core::types::AgentRole;
use crate::io::config::PromptConfig;
use crate::io::file_cache::FileCache;
use crate::io::llm::PromptPart;
use crate::io::preferences::Preferences;
use crate::io::project::ProjectSnapshot;

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");
const PLANNER_PROMPT: &str = include_str!("prompts/planner.md");
const IMPLEMENTER_PROMPT: &str = include_str!("prompts/implementer.md");
const CODE_CRITIC_PROMPT: &str = include_str!("prompts/code_critic.md");
const ART_CRITIC_PROMPT: &str = include_str!("prompts/art_critic.md");
const ENHANCER_PROMPT: &str = include_str!("prompts/enhancer.md");
const PERSONA_PROMPT: &str = include_str!("prompts/persona.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

/// Errors surfaced in prompts.
const PROMPT_ERRORS: usize = 3;

/// Drop order when over budget, first to go first.
const DROP_ORDER: [&str; 7] = [
    "files",
    "history",
    "inventory",
    "guidance",
    "changes",
    "errors",
    "preferences",
];

fn role_prompt(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Planner => PLANNER_PROMPT,
        AgentRole::Implementer => IMPLEMENTER_PROMPT,
        AgentRole::CodeCritic => CODE_CRITIC_PROMPT,
        AgentRole::ArtCritic => ART_CRITIC_PROMPT,
        AgentRole::Enhancer => ENHANCER_PROMPT,
        AgentRole::Persona => PERSONA_PROMPT,
    }
}

/// Which context sections a role receives.
#[derive(Debug, Clone, Copy)]
struct Profile {
    preferences: bool,
    inventory: bool,
    changes: bool,
    errors: bool,
    files: bool,
    guidance: bool,
    history: bool,
    heading: &'static str,
}

fn profile(role: AgentRole) -> Profile {
    let none = Profile {
        preferences: false,
        inventory: false,
        changes: false,
        errors: false,
        files: false,
        guidance: false,
        history: false,
        heading: "INSTRUCTION",
    };
    match role {
        AgentRole::Implementer => Profile {
            preferences: true,
            changes: true,
            errors: true,
            files: true,
            guidance: true,
            history: true,
            heading: "USER REQUEST",
            ..none
        },
        AgentRole::Planner => Profile {
            preferences: true,
            inventory: true,
            changes: true,
            errors: true,
            history: true,
            heading: "USER REQUEST",
            ..none
        },
        AgentRole::Persona => Profile {
            preferences: true,
            inventory: true,
            changes: true,
            history: true,
            heading: "USER QUESTION",
            ..none
        },
        AgentRole::CodeCritic | AgentRole::ArtCritic => none,
        AgentRole::Enhancer => Profile {
            heading: "USER PROMPT",
            ..none
        },
    }
}

/// Read-only session state a prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub preferences: &'a Preferences,
    pub snapshot: &'a ProjectSnapshot,
    pub errors: &'a [&'a str],
    pub history: &'a ConversationLog,
}

/// Material a critic reviews.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewContext {
    pub original_request: String,
    pub implementation: String,
    pub results: String,
    pub project_summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachments {
    None,
    /// Every project image (implementer).
    ProjectImages,
    /// Specific images, relative to the sandbox root.
    Images(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    pub role: AgentRole,
    pub instruction: &'a str,
    pub review: Option<&'a ReviewContext>,
    pub attachments: Attachments,
}

impl<'a> PromptRequest<'a> {
    pub fn new(role: AgentRole, instruction: &'a str) -> Self {
        Self {
            role,
            instruction,
            review: None,
            attachments: Attachments::None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct KeyValue<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct Inventory {
    files: Vec<String>,
    images: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct FileContent {
    path: String,
    content: String,
}

/// Builds prompts for every agent call of a session.
pub struct ContextBuilder {
    env: Environment<'static>,
    cfg: PromptConfig,
    root: PathBuf,
    cache: FileCache,
}

impl ContextBuilder {
    pub fn new(root: impl Into<PathBuf>, cfg: PromptConfig) -> Self {
        let mut env = Environment::new();
        // Interpolated text (file contents, history, instructions) must not open sections.
        env.set_formatter(|out, state, value| match value.as_str() {
            Some(text) if SECTION_RE.is_match(text) => Ok(out.write_str(&defuse_markers(text))?),
            _ => minijinja::escape_formatter(out, state, value),
        });
        env.add_template("agent", AGENT_TEMPLATE)
            .expect("agent template should be valid");
        Self {
            env,
            cfg,
            root: root.into(),
            cache: FileCache::default(),
        }
    }

    pub fn build(&mut self, request: &PromptRequest<'_>, view: SessionView<'_>) -> Result<Vec<PromptPart>> {
        self.build_at(request, view, Utc::now())
    }

    pub fn build_at(
        &mut self,
        request: &PromptRequest<'_>,
        view: SessionView<'_>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PromptPart>> {
        let profile = profile(request.role);
        self.cache.prune();

        let preferences: Vec<KeyValue<'_>> = if profile.preferences {
            view.preferences
                .iter()
                .map(|(key, value)| KeyValue { key, value })
                .collect()
        } else {
            Vec::new()
        };
        let inventory = (profile.inventory
            && (!view.snapshot.files.is_empty() || !view.snapshot.images.is_empty()))
        .then(|| Inventory {
            files: display_all(&view.snapshot.files),
            images: display_all(&view.snapshot.images),
        });
        let changes: Vec<String> = if profile.changes {
            view.snapshot
                .recent_changes
                .iter()
                .map(|change| change.describe())
                .collect()
        } else {
            Vec::new()
        };
        let errors: Vec<&str> = if profile.errors {
            let start = view.errors.len().saturating_sub(PROMPT_ERRORS);
            view.errors[start..].to_vec()
        } else {
            Vec::new()
        };
        let files = if profile.files {
            self.file_contents(view.snapshot)
        } else {
            Vec::new()
        };
        let guidance = if profile.guidance {
            guidance(view.snapshot, !errors.is_empty())
        } else {
            Vec::new()
        };
        let history: Vec<String> = if profile.history {
            view.history
                .tail(self.cfg.history_entries)
                .iter()
                .map(|entry| {
                    format!(
                        "{}: {}",
                        entry.role_title(),
                        clip(&entry.content, self.cfg.history_entry_chars)
                    )
                })
                .collect()
        } else {
            Vec::new()
        };
        let project_summary = (profile.inventory || profile.files).then(|| view.snapshot.summary());

        let template = self.env.get_template("agent")?;
        let rendered = template.render(context! {
            role_prompt => role_prompt(request.role).trim(),
            timestamp => now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            project_summary => project_summary,
            preferences => preferences,
            inventory => inventory,
            changes => changes,
            errors => errors,
            files => files,
            guidance => guidance,
            review => request.review,
            history => history,
            request_heading => profile.heading,
            instruction => request.instruction.trim(),
        })?;

        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.cfg.budget_bytes);
        let text = render_sections(&sections);
        debug!(role = %request.role, bytes = text.len(), "assembled prompt");

        let mut parts = vec![PromptPart::Text(text)];
        let images = match &request.attachments {
            Attachments::None => Vec::new(),
            Attachments::ProjectImages => view.snapshot.images.clone(),
            Attachments::Images(paths) => paths.clone(),
        };
        for rel in images {
            parts.extend(self.image_parts(&rel));
        }
        Ok(parts)
    }

    fn file_contents(&mut self, snapshot: &ProjectSnapshot) -> Vec<FileContent> {
        let mut out = Vec::with_capacity(snapshot.files.len());
        for rel in &snapshot.files {
            match self.cache.text(&self.root.join(rel), self.cfg.file_char_limit) {
                Ok(content) => out.push(FileContent {
                    path: rel.display().to_string(),
                    content,
                }),
                Err(err) => debug!(path = %rel.display(), err = %err, "skipping unreadable file"),
            }
        }
        out
    }

    fn image_parts(&mut self, rel: &Path) -> Vec<PromptPart> {
        let label = rel.display().to_string();
        match self.cache.bytes(&self.root.join(rel)) {
            Ok(data) => vec![
                PromptPart::text(format!("\n--- IMAGE: {label} ---\n")),
                PromptPart::Image {
                    mime: image_mime(rel).to_string(),
                    label,
                    data,
                },
            ],
            Err(err) => {
                debug!(path = %label, err = %err, "image unreadable");
                vec![PromptPart::text(format!("\n--- IMAGE ERROR: {label} ---\n"))]
            }
        }
    }
}

fn display_all(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

pub fn image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Proactive hints for the implementer derived from project state.
fn guidance(snapshot: &ProjectSnapshot, has_errors: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if snapshot.files.is_empty() && snapshot.images.is_empty() {
        lines.push("The project is empty; create an entry point before supporting files.".to_string());
    }
    if !snapshot.images.is_empty() {
        lines.push(format!(
            "{} image(s) are attached below; reuse or reference them instead of regenerating.",
            snapshot.images.len()
        ));
    }
    if has_errors {
        lines.push("Recent operations failed; fix their causes before adding features.".to_string());
    }
    if snapshot.files.len() > 1 {
        lines.push("Use write_file for existing files; create_file is for new ones.".to_string());
    }
    lines
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers, skipping empty sections.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, content_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*content_start..end].trim().to_string();
        if !content.is_empty() {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Break marker-shaped text so the section parser no longer matches it.
fn defuse_markers(text: &str) -> Cow<'_, str> {
    SECTION_RE.replace_all(text, |caps: &Captures<'_>| caps[0].replacen("<!--", "<!- -", 1))
}

/// Drop droppable sections in [`DROP_ORDER`] until under budget, then truncate the largest.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(largest) = sections
        .iter_mut()
        .max_by_key(|s| s.content.len())
    else {
        return;
    };
    let excess = total - budget;
    let before_len = largest.content.len();
    let mut keep = before_len.saturating_sub(excess + 12);
    while keep > 0 && !largest.content.is_char_boundary(keep) {
        keep -= 1;
    }
    largest.content.truncate(keep);
    largest.content.push_str("\n[truncated]");
    debug!(
        section = largest.key,
        before_len,
        after_len = largest.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
