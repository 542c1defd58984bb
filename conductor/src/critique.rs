//! Critique cycle bookkeeping: what critics see and when to retry.

use anyhow::Result;

use crate::agents::TurnContext;
use crate::core::grading::{RetryDecision, RetryPolicy, SubGrade, overall_grade, retry_instruction};
use crate::core::types::{AgentRole, OperationResult, StepResult};
use crate::io::prompt::ReviewContext;

/// Operation results shown to critics.
const REVIEWED_RESULTS: usize = 5;

/// Render the newest operation results, one block per result.
pub fn format_results(results: &[OperationResult]) -> String {
    if results.is_empty() {
        return "No operations were executed.".to_string();
    }
    let start = results.len().saturating_sub(REVIEWED_RESULTS);
    results[start..]
        .iter()
        .map(|r| {
            let mark = if r.success { "ok" } else { "failed" };
            format!("[{mark}] {}: {}", r.operation, r.message.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the material a critic reviews from the latest implementation.
pub fn review_context(turn: &mut TurnContext<'_>) -> Result<ReviewContext> {
    let project_summary = turn.session.project.snapshot()?.summary();
    let (implementation, results) = match &turn.last_implementation {
        Some(imp) => (imp.display_text.clone(), format_results(&imp.operation_results)),
        None => (
            "No implementation has run yet.".to_string(),
            format_results(&[]),
        ),
    };
    Ok(ReviewContext {
        original_request: turn.request.clone(),
        implementation,
        results,
        project_summary,
    })
}

/// Outcome of evaluating a finished implement+critique cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleVerdict {
    pub overall: u8,
    pub decision: RetryDecision,
}

/// One implementer step and the critiques that follow it, across attempts.
#[derive(Debug, Clone)]
pub struct RetryCycle {
    /// Plan index of the implementer step the cycle retries.
    pub implementer_index: usize,
    base_instruction: String,
    /// 1-based attempt number.
    pub attempt: u32,
    sub_grades: Vec<SubGrade>,
    variants_flagged: bool,
    next_instruction: Option<String>,
}

impl RetryCycle {
    pub fn new(implementer_index: usize, base_instruction: impl Into<String>) -> Self {
        Self {
            implementer_index,
            base_instruction: base_instruction.into(),
            attempt: 1,
            sub_grades: Vec::new(),
            variants_flagged: false,
            next_instruction: None,
        }
    }

    /// Instruction to dispatch on a retry, taken once.
    pub fn take_retry_instruction(&mut self) -> Option<String> {
        self.next_instruction.take()
    }

    pub fn record(&mut self, role: AgentRole, result: &StepResult) {
        if let StepResult::Variants(batch) = result
            && batch.needs_retry
        {
            self.variants_flagged = true;
        }
        self.sub_grades.push(SubGrade {
            role,
            grade: result.grade(),
            critique_text: result.critique_text().unwrap_or_default(),
        });
    }

    pub fn has_grades(&self) -> bool {
        !self.sub_grades.is_empty()
    }

    /// Decide the cycle. On retry the next attempt is prepared and the
    /// recorded critiques are cleared.
    pub fn evaluate(&mut self, policy: &RetryPolicy, original_request: &str) -> CycleVerdict {
        let grades: Vec<Option<u8>> = self.sub_grades.iter().map(|s| s.grade).collect();
        let overall = overall_grade(&grades);
        let decision = policy.decide(overall, self.attempt, self.variants_flagged);
        if decision == RetryDecision::Retry {
            self.next_instruction = Some(retry_instruction(
                original_request,
                &self.base_instruction,
                &self.sub_grades,
                overall,
            ));
            self.attempt += 1;
            self.sub_grades.clear();
            self.variants_flagged = false;
        }
        CycleVerdict { overall, decision }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ArtifactCritique, CritiqueResult, VariantBatch};

    fn critique(grade: Option<u8>) -> StepResult {
        StepResult::Critique(CritiqueResult {
            critique_text: "**GRADE: 50/100**\nMissing error handling.".to_string(),
            grade,
        })
    }

    #[test]
    fn formats_only_the_newest_results() {
        let results: Vec<OperationResult> = (0..7)
            .map(|i| OperationResult::ok("create_file", format!("Created file: f{i}.txt (1 bytes)"), None))
            .collect();
        let text = format_results(&results);
        assert_eq!(text.lines().count(), 5);
        assert!(text.starts_with("[ok] create_file: Created file: f2.txt"));
        assert_eq!(format_results(&[]), "No operations were executed.");
    }

    #[test]
    fn retries_until_passing_then_accepts() {
        let policy = RetryPolicy::default();
        let mut cycle = RetryCycle::new(1, "build it");

        cycle.record(AgentRole::CodeCritic, &critique(Some(50)));
        let verdict = cycle.evaluate(&policy, "build a thing");
        assert_eq!(verdict.decision, RetryDecision::Retry);
        assert_eq!(cycle.attempt, 2);
        let retry = cycle.take_retry_instruction().expect("retry instruction");
        assert!(retry.starts_with("RETRY (Original User Prompt: 'build a thing')"));
        assert!(retry.contains("Code Critic Grade: 50"));
        assert!(retry.contains("Missing error handling."));
        assert!(retry.ends_with("build it"));
        assert!(!cycle.has_grades());

        cycle.record(AgentRole::CodeCritic, &critique(Some(75)));
        assert_eq!(cycle.evaluate(&policy, "build a thing").decision, RetryDecision::Accept);
        assert_eq!(cycle.take_retry_instruction(), None);
    }

    #[test]
    fn flagged_variants_force_a_retry_despite_passing_grade() {
        let policy = RetryPolicy::default();
        let mut cycle = RetryCycle::new(0, "draw");
        cycle.record(AgentRole::CodeCritic, &critique(Some(90)));
        cycle.record(
            AgentRole::ArtCritic,
            &StepResult::Variants(VariantBatch {
                critiques: vec![ArtifactCritique {
                    path: "a.png".into(),
                    critique_text: "flat".to_string(),
                    grade: Some(60),
                }],
                winner: None,
                trashed: Vec::new(),
                needs_retry: true,
            }),
        );
        let verdict = cycle.evaluate(&policy, "draw");
        assert_eq!(verdict.overall, 75);
        assert_eq!(verdict.decision, RetryDecision::Retry);
    }
}
