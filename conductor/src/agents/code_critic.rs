//! Code critic: reviews and grades the latest implementation.

use anyhow::Result;

use crate::core::grading::extract_grade;
use crate::core::types::{AgentRole, CritiqueResult, StepResult};
use crate::critique::review_context;
use crate::io::prompt::PromptRequest;

use super::{AgentHandler, TurnContext, call_agent};

pub struct CodeCriticAgent;

impl AgentHandler for CodeCriticAgent {
    fn role(&self) -> AgentRole {
        AgentRole::CodeCritic
    }

    fn run(&self, turn: &mut TurnContext<'_>, instruction: &str) -> Result<StepResult> {
        let review = review_context(turn)?;
        let request = PromptRequest {
            review: Some(&review),
            ..PromptRequest::new(AgentRole::CodeCritic, instruction)
        };
        let critique = match call_agent(turn, &request) {
            Ok(text) => {
                let grade = extract_grade(&text);
                announce_grade(turn, AgentRole::CodeCritic, grade);
                CritiqueResult {
                    critique_text: text,
                    grade,
                }
            }
            Err(err) => {
                turn.report_error(format!("Code critique skipped: {err:#}"));
                CritiqueResult {
                    critique_text: String::new(),
                    grade: None,
                }
            }
        };
        Ok(StepResult::Critique(critique))
    }
}

pub(crate) fn announce_grade(turn: &TurnContext<'_>, role: AgentRole, grade: Option<u8>) {
    match grade {
        Some(grade) => turn
            .events
            .system(format!("{} grade: {grade}/100", role.display_name())),
        None => turn
            .events
            .system(format!("{} gave no grade", role.display_name())),
    }
}
