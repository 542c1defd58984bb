//! Prompt enhancer: rewrites the user request into a precise implementer prompt.

use anyhow::Result;
use tracing::warn;

use crate::core::types::{AgentRole, StepResult};
use crate::io::prompt::PromptRequest;

use super::{AgentHandler, TurnContext, call_agent};

pub struct EnhancerAgent;

impl AgentHandler for EnhancerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Enhancer
    }

    /// Reuses the turn's refinement when one exists, so a plan step after the
    /// up-front enhancement costs no second call.
    fn run(&self, turn: &mut TurnContext<'_>, _instruction: &str) -> Result<StepResult> {
        Ok(StepResult::Text(refine(turn)))
    }
}

/// Refined request for this turn. Falls back to the original on any failure.
pub fn refine(turn: &mut TurnContext<'_>) -> String {
    if let Some(refined) = &turn.refined_request {
        return refined.clone();
    }
    let original = turn.request.clone();
    let request = PromptRequest::new(AgentRole::Enhancer, &original);
    let refined = match call_agent(turn, &request) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!("enhancer returned nothing, keeping the original request");
            original.clone()
        }
        Err(err) => {
            turn.report_error(format!("Prompt enhancement failed, using original prompt: {err:#}"));
            original.clone()
        }
    };
    turn.refined_request = Some(refined.clone());
    refined
}
