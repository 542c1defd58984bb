//! Persona agent: conversational answers, and the post-cycle refinement pass.

use anyhow::Result;
use tracing::debug;

use crate::core::types::{AgentRole, StepResult};
use crate::io::prompt::PromptRequest;

use super::{AgentHandler, TurnContext, call_agent};

/// Conversation entries required before a refinement pass makes sense.
const REFINEMENT_MIN_ENTRIES: usize = 3;
const REFINEMENT_ENTRIES: usize = 6;
const REFINEMENT_ENTRY_CHARS: usize = 400;

pub struct PersonaAgent;

impl AgentHandler for PersonaAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Persona
    }

    fn run(&self, turn: &mut TurnContext<'_>, instruction: &str) -> Result<StepResult> {
        let request = PromptRequest::new(AgentRole::Persona, instruction);
        call_agent(turn, &request).map(StepResult::Text)
    }
}

/// Ask for a collaborative follow-up over the recent conversation.
///
/// Returns the refinement text, or `None` when the log is too short or the
/// call failed.
pub fn collaborative_refinement(turn: &mut TurnContext<'_>) -> Option<String> {
    let history = &turn.session.history;
    if history.len() < REFINEMENT_MIN_ENTRIES {
        debug!(entries = history.len(), "not enough history for refinement");
        return None;
    }
    let instruction = format!(
        "Review the team's recent work and propose concrete refinements.\n\nORIGINAL REQUEST: {}\n\nRECENT CONVERSATION:\n{}\n\nList the most important remaining issues and how to fix each one.",
        turn.request,
        history.summary(REFINEMENT_ENTRIES, REFINEMENT_ENTRY_CHARS)
    );
    turn.events.system("Starting collaborative refinement");
    match PersonaAgent.run(turn, &instruction) {
        Ok(StepResult::Text(text)) => Some(text),
        Ok(_) => None,
        Err(err) => {
            turn.report_error(format!("Collaborative refinement failed: {err:#}"));
            None
        }
    }
}
