//! Implementer agent: the only role whose output is executed.

use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::core::sentinel::split_replan;
use crate::core::types::{AgentRole, ImplementationResult, OperationResult, PathChanged, StepResult};
use crate::io::prompt::{Attachments, PromptRequest};

use super::{AgentHandler, TurnContext, call_agent};

pub struct ImplementerAgent;

impl AgentHandler for ImplementerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Implementer
    }

    fn run(&self, turn: &mut TurnContext<'_>, instruction: &str) -> Result<StepResult> {
        turn.stats.implementer_runs += 1;
        let request = PromptRequest {
            attachments: Attachments::ProjectImages,
            ..PromptRequest::new(AgentRole::Implementer, instruction)
        };
        let raw_text = call_agent(turn, &request)?;

        let split = split_replan(&raw_text);
        let operation_results = turn
            .session
            .interpreter(turn.events)
            .execute_text(&split.display_text);
        let artifact_paths = artifact_paths(&operation_results);
        debug!(
            operations = operation_results.len(),
            artifacts = artifact_paths.len(),
            replan = split.replan_reason.is_some(),
            "implementation executed"
        );

        let result = ImplementationResult {
            raw_text,
            display_text: split.display_text,
            operation_results,
            artifact_paths,
            replan_reason: split.replan_reason,
        };
        turn.last_implementation = Some(result.clone());
        Ok(StepResult::Implementation(result))
    }
}

/// Paths that exist after the step because it created, wrote or generated them.
fn artifact_paths(results: &[OperationResult]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for change in results.iter().filter_map(|r| r.side_effect.as_ref()) {
        let path = match change {
            PathChanged::Created { path }
            | PathChanged::Written { path }
            | PathChanged::Generated { path } => path,
            PathChanged::Renamed { to, .. } => to,
            PathChanged::Deleted { path } => {
                paths.retain(|p| p != path);
                continue;
            }
        };
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }
    paths
}
