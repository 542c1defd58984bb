//! Planner agent: turns a request into a validated step list.

use anyhow::Result;
use tracing::warn;

use crate::core::critic_policy::indicates_visual;
use crate::core::plan::{PlanOrigin, fallback_plan, parse_plan};
use crate::core::types::{AgentRole, Plan, StepResult};
use crate::io::prompt::PromptRequest;

use super::{AgentHandler, TurnContext, call_agent};

pub struct PlannerAgent;

impl AgentHandler for PlannerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    fn run(&self, turn: &mut TurnContext<'_>, instruction: &str) -> Result<StepResult> {
        turn.stats.planner_calls += 1;
        let request = PromptRequest::new(AgentRole::Planner, instruction);
        call_agent(turn, &request).map(StepResult::Text)
    }
}

/// Instruction for a re-plan after the implementer asked for one.
pub fn replan_instruction(original_request: &str, reason: &str, recent_actions: &str) -> String {
    let actions = if recent_actions.trim().is_empty() {
        "No actions yet."
    } else {
        recent_actions
    };
    format!(
        "{original_request}\n\nThe previous plan was abandoned. The implementer requested a new plan: {reason}\n\nRECENT ACTIONS:\n{actions}"
    )
}

/// Ask the planner for a plan, falling back to the fixed sequence.
///
/// `request` is what the fixed plan's implementer step works on. A backend
/// failure or an unusable reply never fails the turn.
pub fn request_plan(
    turn: &mut TurnContext<'_>,
    instruction: &str,
    request: &str,
    include_enhancer: bool,
) -> (Plan, PlanOrigin) {
    let fallback = || fallback_plan(request, include_enhancer, indicates_visual(request));
    let reply = match PlannerAgent.run(turn, instruction) {
        Ok(StepResult::Text(reply)) => reply,
        Ok(_) => return (fallback(), PlanOrigin::Fallback),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "planner unavailable");
            turn.report_error(format!("Planner failed, using default plan: {err:#}"));
            return (fallback(), PlanOrigin::Fallback);
        }
    };
    match parse_plan(&reply) {
        Ok(plan) => {
            turn.events.system(format!("Plan ready: {} steps", plan.len()));
            (plan, PlanOrigin::Planner)
        }
        Err(err) => {
            warn!(err = %err, "planner reply rejected");
            turn.events
                .system(format!("Planner reply unusable ({err}); using default plan"));
            (fallback(), PlanOrigin::Fallback)
        }
    }
}
