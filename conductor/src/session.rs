//! Per-process state shared by every turn: sandbox, history, project context.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::core::history::{ConversationLog, ERROR_LIMIT, ErrorLog};
use crate::events::EventSink;
use crate::interpreter::Interpreter;
use crate::io::config::ConductorConfig;
use crate::io::llm::{LlmClient, PromptPart};
use crate::io::preferences::{PreferenceStore, Preferences};
use crate::io::prompt::{ContextBuilder, PromptRequest, SessionView};
use crate::io::project::ProjectContext;
use crate::io::sandbox::SandboxGateway;
use crate::io::trash::Trash;

pub struct Session {
    pub config: ConductorConfig,
    pub gateway: SandboxGateway,
    pub trash: Trash,
    pub preferences: Arc<PreferenceStore>,
    pub project: ProjectContext,
    pub history: ConversationLog,
    pub errors: ErrorLog,
    pub context: ContextBuilder,
    pub llm: Arc<dyn LlmClient>,
}

impl Session {
    /// Open a session over the configured sandbox, creating it if needed.
    pub fn open(config: ConductorConfig, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let gateway = SandboxGateway::new(&config.sandbox_dir)?;
        let trash = Trash::new(config.trash_dir());
        let preferences = Arc::new(PreferenceStore::new(&config.preferences_path));
        let project = ProjectContext::new(gateway.root());
        let context = ContextBuilder::new(gateway.root(), config.prompt.clone());
        Ok(Self {
            config,
            gateway,
            trash,
            preferences,
            project,
            history: ConversationLog::default(),
            errors: ErrorLog::default(),
            context,
            llm,
        })
    }

    /// Assemble a prompt from the current session state.
    pub fn build_prompt(&mut self, request: &PromptRequest<'_>) -> Result<Vec<PromptPart>> {
        let preferences = self.preferences.snapshot().unwrap_or_else(|err| {
            warn!(err = %err, "preferences unavailable for prompt");
            Preferences::new()
        });
        let snapshot = self.project.snapshot()?;
        let errors = self.errors.recent(ERROR_LIMIT);
        let view = SessionView {
            preferences: &preferences,
            snapshot,
            errors: &errors,
            history: &self.history,
        };
        self.context.build(request, view)
    }

    /// Command interpreter bound to this session's sandbox and state.
    pub fn interpreter<'s>(&'s mut self, events: &'s EventSink) -> Interpreter<'s> {
        Interpreter {
            gateway: &self.gateway,
            preferences: &self.preferences,
            llm: self.llm.as_ref(),
            process: &self.config.process,
            project: &mut self.project,
            errors: &mut self.errors,
            events,
        }
    }
}
