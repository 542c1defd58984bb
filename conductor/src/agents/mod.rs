//! Agent handlers: one per role, all behind the same step interface.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::grading::RetryPolicy;
use crate::core::sentinel::ReplanStreamFilter;
use crate::core::types::{AgentRole, ImplementationResult, StepResult};
use crate::events::{AgentActivity, EventSink};
use crate::io::llm::{GenerateRequest, collect};
use crate::io::prompt::PromptRequest;
use crate::session::Session;

pub mod art_critic;
pub mod code_critic;
pub mod enhancer;
pub mod implementer;
pub mod persona;
pub mod planner;

/// Counters reported at the end of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub implementer_runs: u32,
    pub planner_calls: u32,
    pub replans: u32,
}

/// Mutable state of the turn a step runs in.
pub struct TurnContext<'a> {
    pub session: &'a mut Session,
    pub events: &'a EventSink,
    /// The request as the user typed it.
    pub request: String,
    /// Enhancer output, computed at most once per turn.
    pub refined_request: Option<String>,
    /// Output of the most recent implementer step, reviewed by critics.
    pub last_implementation: Option<ImplementationResult>,
    pub policy: RetryPolicy,
    pub grading: bool,
    pub stats: TurnStats,
}

impl<'a> TurnContext<'a> {
    pub fn new(
        session: &'a mut Session,
        events: &'a EventSink,
        request: &str,
        grading: bool,
    ) -> Self {
        let policy = session.config.grading.policy();
        Self {
            session,
            events,
            request: request.to_string(),
            refined_request: None,
            last_implementation: None,
            policy,
            grading,
            stats: TurnStats::default(),
        }
    }

    /// Record a backend or operation failure for the user and later prompts.
    pub fn report_error(&mut self, message: String) {
        self.events.error(message.clone());
        self.session.errors.push(message);
    }
}

/// Executes plan steps for one agent role.
pub trait AgentHandler: Send + Sync {
    fn role(&self) -> AgentRole;

    fn run(&self, turn: &mut TurnContext<'_>, instruction: &str) -> Result<StepResult>;
}

/// Dispatch table from role to handler.
pub struct AgentTable {
    handlers: BTreeMap<AgentRole, Box<dyn AgentHandler>>,
}

impl AgentTable {
    pub fn standard() -> Self {
        let handlers: [Box<dyn AgentHandler>; 6] = [
            Box::new(planner::PlannerAgent),
            Box::new(implementer::ImplementerAgent),
            Box::new(code_critic::CodeCriticAgent),
            Box::new(art_critic::ArtCriticAgent),
            Box::new(enhancer::EnhancerAgent),
            Box::new(persona::PersonaAgent),
        ];
        Self {
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.role(), handler))
                .collect(),
        }
    }

    pub fn get(&self, role: AgentRole) -> Option<&dyn AgentHandler> {
        self.handlers.get(&role).map(Box::as_ref)
    }
}

/// One streamed model call on behalf of `request.role`.
///
/// Marks the agent active for the duration, forwards text chunks as they
/// arrive and appends the full reply to the conversation log. Implementer
/// chunks go through a [`ReplanStreamFilter`] so a trailing re-plan directive
/// never reaches the display.
#[instrument(skip_all, fields(agent = %request.role))]
pub(crate) fn call_agent(turn: &mut TurnContext<'_>, request: &PromptRequest<'_>) -> Result<String> {
    let role = request.role;
    let parts = turn.session.build_prompt(request)?;
    debug!(parts = parts.len(), "prompt assembled");

    let events = turn.events;
    let mut filter = (role == AgentRole::Implementer).then(ReplanStreamFilter::default);
    events.agent_status(role, AgentActivity::Active);
    let reply = collect(
        turn.session.llm.as_ref(),
        &GenerateRequest::text(role, parts),
        &mut |text| match filter.as_mut() {
            Some(filter) => events.text_chunk(role, &filter.push(text)),
            None => events.text_chunk(role, text),
        },
    );
    if let Some(filter) = filter {
        events.text_chunk(role, &filter.finish());
    }
    events.agent_status(role, AgentActivity::Inactive);

    let generated = reply.with_context(|| format!("{} call failed", role.display_name()))?;
    turn.session.history.push(role.as_str(), &generated.text);
    Ok(generated.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_every_role() {
        let table = AgentTable::standard();
        for role in AgentRole::ALL {
            assert_eq!(table.get(role).map(|h| h.role()), Some(role));
        }
    }
}
