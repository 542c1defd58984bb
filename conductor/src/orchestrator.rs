//! Plan executor: runs one user turn from request to `done`.
//!
//! The turn is a small state machine over the active plan. A cursor walks the
//! steps; each step resolves its instruction, runs its agent and is then
//! post-processed for re-plan requests and the critique cycle.

use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, instrument};

use crate::agents::{AgentTable, TurnContext, TurnStats, enhancer, persona, planner};
use crate::core::critic_policy::{needs_refinement, should_run_art_critic, should_run_code_critic};
use crate::core::grading::RetryDecision;
use crate::core::plan::{FEEDBACK_PLACEHOLDER, PlanOrigin};
use crate::core::types::{AgentRole, Plan, Step, StepResult};
use crate::critique::{RetryCycle, format_results};
use crate::events::{self, Event, EventSink, TurnStatus};
use crate::session::Session;

/// Per-turn switches, defaulting to the session config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOptions {
    pub enhance: bool,
    pub grading: bool,
}

impl TurnOptions {
    pub fn from_session(session: &Session) -> Self {
        Self {
            enhance: session.config.enhancer_enabled,
            grading: session.config.grading.enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub implementer_runs: u32,
    pub planner_calls: u32,
    pub replans: u32,
    /// Overall grade of the last evaluated cycle.
    pub final_grade: Option<u8>,
}

/// Where the step loop ended up.
struct Finish {
    status: TurnStatus,
    final_grade: Option<u8>,
    critics_ran: bool,
}

/// Run one turn on the calling thread. Always ends with a `done` event.
#[instrument(skip_all, fields(request_len = request.len()))]
pub fn run_turn(
    session: &mut Session,
    request: &str,
    options: TurnOptions,
    events: &EventSink,
) -> TurnOutcome {
    session.history.push("user", request);
    let table = AgentTable::standard();
    let mut turn = TurnContext::new(session, events, request, options.grading);

    let (status, final_grade) = match drive(&mut turn, &table, options) {
        Ok(finish) => {
            if finish.critics_ran {
                refine_if_needed(&mut turn);
            }
            (finish.status, finish.final_grade)
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "turn failed");
            turn.report_error(format!("Turn failed: {err:#}"));
            (TurnStatus::Failed, None)
        }
    };
    events.emit(Event::Done { status });

    let TurnStats {
        implementer_runs,
        planner_calls,
        replans,
    } = turn.stats;
    info!(status = status.as_str(), implementer_runs, planner_calls, replans, "turn finished");
    TurnOutcome {
        status,
        implementer_runs,
        planner_calls,
        replans,
        final_grade,
    }
}

/// Run a turn on a worker thread. The session comes back with the outcome.
pub fn spawn_turn(
    mut session: Session,
    request: String,
    options: TurnOptions,
) -> (Receiver<Event>, JoinHandle<(Session, TurnOutcome)>) {
    let (sink, rx) = events::channel();
    let handle = thread::spawn(move || {
        let outcome = run_turn(&mut session, &request, options, &sink);
        (session, outcome)
    });
    (rx, handle)
}

fn drive(turn: &mut TurnContext<'_>, table: &AgentTable, options: TurnOptions) -> Result<Finish> {
    let request = if options.enhance {
        enhancer::refine(turn)
    } else {
        turn.request.clone()
    };
    let (mut plan, mut origin) = planner::request_plan(turn, &request, &request, options.enhance);
    let max_replans = turn.session.config.planner.max_replans;

    let mut cursor = 0;
    let mut previous: Option<StepResult> = None;
    let mut cycle: Option<RetryCycle> = None;
    let mut finish = Finish {
        status: TurnStatus::Completed,
        final_grade: None,
        critics_ran: false,
    };

    while let Some(step) = plan.get(cursor).cloned() {
        let role = step.agent_role;
        debug!(cursor, role = %role, "dispatch");
        let handler = table
            .get(role)
            .ok_or_else(|| anyhow!("no handler registered for {role}"))?;

        let skipped = origin == PlanOrigin::Fallback && role.is_critic() && !critic_wanted(turn, role);
        if skipped {
            turn.events
                .system(format!("Skipping {}: not needed for this request", role.display_name()));
        } else {
            let mut instruction = resolve_instruction(&step, previous.as_ref());
            if role == AgentRole::Implementer {
                let retrying = cycle.as_ref().is_some_and(|c| c.implementer_index == cursor);
                if !retrying {
                    cycle = Some(RetryCycle::new(cursor, instruction.clone()));
                } else if let Some(retry) = cycle.as_mut().and_then(RetryCycle::take_retry_instruction) {
                    instruction = retry;
                }
            }

            let result = handler.run(turn, &instruction)?;

            if let StepResult::Implementation(imp) = &result
                && let Some(reason) = &imp.replan_reason
            {
                if turn.stats.replans < max_replans {
                    turn.stats.replans += 1;
                    turn.events.system(format!("Re-planning: {reason}"));
                    let replan = planner::replan_instruction(
                        &turn.request,
                        reason,
                        &format_results(&imp.operation_results),
                    );
                    (plan, origin) = planner::request_plan(turn, &replan, &request, false);
                    cursor = 0;
                    previous = None;
                    cycle = None;
                    continue;
                }
                turn.report_error(format!(
                    "Re-plan limit of {max_replans} reached; continuing with the current plan"
                ));
            }

            if role.is_critic() {
                finish.critics_ran = true;
                if let Some(active) = cycle.as_mut() {
                    active.record(role, &result);
                }
            }
            previous = Some(result);
        }

        let cycle_ends = role.is_critic() && !next_is_critic(&plan, cursor) && turn.grading;
        let verdict = cycle
            .as_mut()
            .filter(|c| cycle_ends && c.has_grades())
            .map(|c| (c.evaluate(&turn.policy, &turn.request), c.attempt, c.implementer_index));
        if let Some((verdict, attempt, implementer_index)) = verdict {
            finish.final_grade = Some(verdict.overall);
            match verdict.decision {
                RetryDecision::Retry => {
                    turn.events.system(format!(
                        "Overall grade {}/100; retrying (attempt {attempt} of {})",
                        verdict.overall, turn.policy.max_attempts
                    ));
                    cursor = implementer_index;
                    previous = None;
                    continue;
                }
                RetryDecision::Accept => {
                    turn.events
                        .system(format!("Accepted with overall grade {}/100", verdict.overall));
                    finish.status = TurnStatus::Accepted;
                }
                RetryDecision::Exhausted => {
                    turn.events.system(format!(
                        "Maximum attempts reached; final overall grade {}/100",
                        verdict.overall
                    ));
                    finish.status = TurnStatus::NotAccepted;
                }
            }
            cycle = None;
        }

        if step.is_final {
            break;
        }
        cursor += 1;
    }
    Ok(finish)
}

/// Implementer instructions may quote the previous critique.
fn resolve_instruction(step: &Step, previous: Option<&StepResult>) -> String {
    if step.agent_role != AgentRole::Implementer || !step.instruction.contains(FEEDBACK_PLACEHOLDER) {
        return step.instruction.clone();
    }
    let feedback = previous
        .and_then(StepResult::critique_text)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| "No previous feedback.".to_string());
    step.instruction.replace(FEEDBACK_PLACEHOLDER, &feedback)
}

fn next_is_critic(plan: &Plan, cursor: usize) -> bool {
    plan.get(cursor + 1)
        .is_some_and(|step| step.agent_role.is_critic())
}

fn critic_wanted(turn: &TurnContext<'_>, role: AgentRole) -> bool {
    let (response, results) = match &turn.last_implementation {
        Some(imp) => (imp.display_text.as_str(), imp.operation_results.as_slice()),
        None => ("", &[][..]),
    };
    match role {
        AgentRole::CodeCritic => should_run_code_critic(&turn.request, response, results),
        AgentRole::ArtCritic => should_run_art_critic(&turn.request, response, results),
        _ => true,
    }
}

fn refine_if_needed(turn: &mut TurnContext<'_>) {
    let needed = turn
        .last_implementation
        .as_ref()
        .is_some_and(|imp| needs_refinement(&imp.operation_results));
    if needed {
        persona::collaborative_refinement(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CritiqueResult;

    #[test]
    fn placeholder_takes_previous_critique() {
        let step = Step::new(
            AgentRole::Implementer,
            format!("Fix these issues: {FEEDBACK_PLACEHOLDER}"),
            false,
        );
        let previous = StepResult::Critique(CritiqueResult {
            critique_text: "use a loop".to_string(),
            grade: Some(60),
        });
        assert_eq!(
            resolve_instruction(&step, Some(&previous)),
            "Fix these issues: use a loop"
        );
        assert_eq!(
            resolve_instruction(&step, None),
            "Fix these issues: No previous feedback."
        );
    }

    #[test]
    fn placeholder_is_left_alone_for_other_roles() {
        let step = Step::new(AgentRole::Persona, FEEDBACK_PLACEHOLDER, true);
        assert_eq!(resolve_instruction(&step, None), FEEDBACK_PLACEHOLDER);
    }
}
