//! Art critic: grades visual work, and picks a winner among image variants.

use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::core::grading::{extract_grade, select_variants};
use crate::core::types::{
    AgentRole, ArtifactCritique, CritiqueResult, PathChanged, StepResult, VariantBatch,
};
use crate::critique::review_context;
use crate::io::prompt::{Attachments, PromptRequest, ReviewContext};

use super::code_critic::announce_grade;
use super::{AgentHandler, TurnContext, call_agent};

pub struct ArtCriticAgent;

impl AgentHandler for ArtCriticAgent {
    fn role(&self) -> AgentRole {
        AgentRole::ArtCritic
    }

    fn run(&self, turn: &mut TurnContext<'_>, instruction: &str) -> Result<StepResult> {
        let review = review_context(turn)?;
        let variants = generated_images(turn);
        if variants.is_empty() {
            let request = PromptRequest {
                review: Some(&review),
                attachments: Attachments::ProjectImages,
                ..PromptRequest::new(AgentRole::ArtCritic, instruction)
            };
            let critique = match critique_once(turn, &request) {
                Some((text, grade)) => CritiqueResult {
                    critique_text: text,
                    grade,
                },
                None => CritiqueResult {
                    critique_text: String::new(),
                    grade: None,
                },
            };
            return Ok(StepResult::Critique(critique));
        }
        Ok(StepResult::Variants(critique_variants(
            turn,
            instruction,
            &review,
            variants,
        )))
    }
}

/// Images the latest implementation generated that still exist.
fn generated_images(turn: &TurnContext<'_>) -> Vec<PathBuf> {
    let Some(imp) = &turn.last_implementation else {
        return Vec::new();
    };
    imp.operation_results
        .iter()
        .filter_map(|r| match &r.side_effect {
            Some(PathChanged::Generated { path }) if imp.artifact_paths.contains(path) => {
                Some(path.clone())
            }
            _ => None,
        })
        .collect()
}

fn critique_once(turn: &mut TurnContext<'_>, request: &PromptRequest<'_>) -> Option<(String, Option<u8>)> {
    match call_agent(turn, request) {
        Ok(text) => {
            let grade = extract_grade(&text);
            announce_grade(turn, AgentRole::ArtCritic, grade);
            Some((text, grade))
        }
        Err(err) => {
            turn.report_error(format!("Art critique skipped: {err:#}"));
            None
        }
    }
}

/// Critique each variant on its own, keep the winner and trash the rest.
fn critique_variants(
    turn: &mut TurnContext<'_>,
    instruction: &str,
    review: &ReviewContext,
    variants: Vec<PathBuf>,
) -> VariantBatch {
    let total = variants.len();
    let mut critiques = Vec::with_capacity(total);
    for (idx, path) in variants.into_iter().enumerate() {
        turn.events.system(format!(
            "Reviewing image {} of {total}: {}",
            idx + 1,
            path.display()
        ));
        let variant_instruction = format!(
            "{instruction}\n\nEvaluate this image on its own: {}",
            path.display()
        );
        let request = PromptRequest {
            review: Some(review),
            attachments: Attachments::Images(vec![path.clone()]),
            ..PromptRequest::new(AgentRole::ArtCritic, &variant_instruction)
        };
        let (critique_text, grade) = critique_once(turn, &request).unwrap_or_default();
        critiques.push(ArtifactCritique {
            path,
            critique_text,
            grade,
        });
    }

    if !turn.grading {
        return VariantBatch {
            critiques,
            winner: None,
            trashed: Vec::new(),
            needs_retry: false,
        };
    }

    let selection = select_variants(&critiques, &turn.policy);
    debug!(?selection, "variant selection");
    let mut trashed = Vec::new();
    for idx in &selection.discard {
        let rel = &critiques[*idx].path;
        let absolute = turn.session.gateway.root().join(rel);
        match turn.session.trash.discard(&absolute) {
            Ok(dest) => {
                turn.events
                    .system(format!("Moved variant to trash: {}", rel.display()));
                turn.events.file_changed(rel.clone());
                trashed.push(dest);
            }
            Err(err) => turn.report_error(format!(
                "Could not move {} to trash: {err:#}",
                rel.display()
            )),
        }
    }
    if !trashed.is_empty() {
        turn.session.project.mark_dirty();
    }

    let winner = selection.winner.map(|idx| critiques[idx].path.clone());
    if let Some(path) = &winner {
        turn.events
            .system(format!("Kept best variant: {}", path.display()));
    }
    if selection.needs_retry {
        turn.events
            .system("No image variant reached the passing grade; all variants discarded");
    }
    VariantBatch {
        critiques,
        winner,
        trashed,
        needs_retry: selection.needs_retry,
    }
}
