//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the plan executor, the command
//! interpreter and the grading controller. They carry no I/O handles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of agent roles a plan step can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum AgentRole {
    Planner,
    Implementer,
    CodeCritic,
    ArtCritic,
    Enhancer,
    Persona,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Planner,
        AgentRole::Implementer,
        AgentRole::CodeCritic,
        AgentRole::ArtCritic,
        AgentRole::Enhancer,
        AgentRole::Persona,
    ];

    /// Stable identifier used in plans, logs and conversation history.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Implementer => "implementer",
            AgentRole::CodeCritic => "code_critic",
            AgentRole::ArtCritic => "art_critic",
            AgentRole::Enhancer => "enhancer",
            AgentRole::Persona => "persona",
        }
    }

    /// Human-facing name used in event text.
    pub fn display_name(self) -> &'static str {
        match self {
            AgentRole::Planner => "Planner",
            AgentRole::Implementer => "Main Coder",
            AgentRole::CodeCritic => "Code Critic",
            AgentRole::ArtCritic => "Art Critic",
            AgentRole::Enhancer => "Prompt Enhancer",
            AgentRole::Persona => "Persona",
        }
    }

    pub fn is_critic(self) -> bool {
        matches!(self, AgentRole::CodeCritic | AgentRole::ArtCritic)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for role names the planner invents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for AgentRole {
    type Err = UnknownRole;

    /// Accepts the canonical ids plus the names planners tend to use.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let role = match normalized.as_str() {
            "planner" | "plan" => AgentRole::Planner,
            "implementer" | "main_coder" | "coder" | "main" | "primary_coder" => {
                AgentRole::Implementer
            }
            "code_critic" | "critic" | "code_reviewer" => AgentRole::CodeCritic,
            "art_critic" | "art" | "design_critic" => AgentRole::ArtCritic,
            "enhancer" | "prompt_enhancer" | "refiner" | "prompt_refiner" => AgentRole::Enhancer,
            "persona" | "assistant" | "qa" | "q&a" => AgentRole::Persona,
            _ => return Err(UnknownRole(raw.to_string())),
        };
        Ok(role)
    }
}

impl TryFrom<String> for AgentRole {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One entry of a plan produced by the planner agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub agent_role: AgentRole,
    pub instruction: String,
    pub is_final: bool,
}

impl Step {
    pub fn new(agent_role: AgentRole, instruction: impl Into<String>, is_final: bool) -> Self {
        Self {
            agent_role,
            instruction: instruction.into(),
            is_final,
        }
    }
}

/// Ordered step list for one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }
}

/// What a successful mutating operation did to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathChanged {
    Created { path: PathBuf },
    Written { path: PathBuf },
    Deleted { path: PathBuf },
    Renamed { from: PathBuf, to: PathBuf },
    Generated { path: PathBuf },
}

impl PathChanged {
    /// Path that now reflects the change (the destination for renames).
    pub fn path(&self) -> &PathBuf {
        match self {
            PathChanged::Created { path }
            | PathChanged::Written { path }
            | PathChanged::Deleted { path }
            | PathChanged::Generated { path } => path,
            PathChanged::Renamed { to, .. } => to,
        }
    }
}

/// Extensions treated as images for inventory, prompts and art critique.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "webp"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Outcome of one parsed command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub operation: String,
    pub success: bool,
    pub message: String,
    pub side_effect: Option<PathChanged>,
}

impl OperationResult {
    pub fn ok(operation: &str, message: impl Into<String>, side_effect: Option<PathChanged>) -> Self {
        Self {
            operation: operation.to_string(),
            success: true,
            message: message.into(),
            side_effect,
        }
    }

    pub fn failed(operation: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            success: false,
            message: message.into(),
            side_effect: None,
        }
    }
}

/// Implementer step output after commands ran.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImplementationResult {
    /// Full model text, including any re-plan directive.
    pub raw_text: String,
    /// Text shown to the user (directive stripped).
    pub display_text: String,
    pub operation_results: Vec<OperationResult>,
    /// Paths created or regenerated by this step, relative to the sandbox root.
    pub artifact_paths: Vec<PathBuf>,
    /// Reason given in a trailing re-plan directive, if any.
    pub replan_reason: Option<String>,
}

/// Critique of a whole implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CritiqueResult {
    pub critique_text: String,
    pub grade: Option<u8>,
}

/// Critique of a single generated artifact in a variant batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCritique {
    pub path: PathBuf,
    pub critique_text: String,
    pub grade: Option<u8>,
}

/// Art critique over a batch of image variants, after winner selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantBatch {
    pub critiques: Vec<ArtifactCritique>,
    pub winner: Option<PathBuf>,
    /// Where each discarded variant ended up in the trash area.
    pub trashed: Vec<PathBuf>,
    /// No variant reached the passing threshold.
    pub needs_retry: bool,
}

impl VariantBatch {
    /// Grade that represents the batch in the overall grade: the winner's.
    pub fn grade(&self) -> Option<u8> {
        self.critiques.iter().filter_map(|c| c.grade).max()
    }

    pub fn combined_text(&self) -> String {
        self.critiques
            .iter()
            .map(|c| format!("[{}]\n{}", c.path.display(), c.critique_text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Output of one executed step, by agent role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Implementation(ImplementationResult),
    Critique(CritiqueResult),
    Variants(VariantBatch),
    Text(String),
}

impl StepResult {
    /// Critique text if this result came from a critic.
    pub fn critique_text(&self) -> Option<String> {
        match self {
            StepResult::Critique(c) => Some(c.critique_text.clone()),
            StepResult::Variants(batch) => Some(batch.combined_text()),
            _ => None,
        }
    }

    /// Grade contributed to the overall grade, if any.
    pub fn grade(&self) -> Option<u8> {
        match self {
            StepResult::Critique(c) => c.grade,
            StepResult::Variants(batch) => batch.grade(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_aliases_case_insensitively() {
        assert_eq!("Main Coder".parse::<AgentRole>(), Ok(AgentRole::Implementer));
        assert_eq!("prompt-enhancer".parse::<AgentRole>(), Ok(AgentRole::Enhancer));
        assert_eq!("CODE_CRITIC".parse::<AgentRole>(), Ok(AgentRole::CodeCritic));
        assert!("janitor".parse::<AgentRole>().is_err());
    }

    #[test]
    fn step_deserializes_role_alias() {
        let step: Step = serde_json::from_str(
            r#"{"agent_role":"coder","instruction":"build it","is_final":false}"#,
        )
        .expect("parse step");
        assert_eq!(step.agent_role, AgentRole::Implementer);
    }

    #[test]
    fn variant_batch_grade_is_best_variant() {
        let batch = VariantBatch {
            critiques: vec![
                ArtifactCritique {
                    path: "a.png".into(),
                    critique_text: "meh".into(),
                    grade: Some(55),
                },
                ArtifactCritique {
                    path: "b.png".into(),
                    critique_text: "good".into(),
                    grade: Some(81),
                },
            ],
            winner: Some("b.png".into()),
            trashed: Vec::new(),
            needs_retry: false,
        };
        assert_eq!(StepResult::Variants(batch).grade(), Some(81));
    }
}
