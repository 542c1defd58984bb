//! Heuristics deciding whether critics are worth invoking for a request.
//!
//! Only the fixed fallback plan is gated; critic steps issued by the planner
//! always run.

use crate::core::types::{OperationResult, PathChanged, is_image_path};

const CODE_SKIP_WORDS: &[&str] = &[
    "run",
    "start",
    "execute",
    "launch",
    "install",
    "update",
    "pip install",
    "npm install",
    "serve",
    "host",
    "deploy",
    "build",
    "compile",
];

const ART_SKIP_WORDS: &[&str] = &[
    "run", "start", "execute", "launch", "install", "update", "serve",
];

const CODE_WORK: &[&str] = &[
    "create_file",
    "write_file",
    "write_to_file",
    "function",
    "class",
    "algorithm",
    "implement",
    "refactor",
    "optimize",
    "fix bug",
    "debug",
    "security",
    "performance",
    "review code",
    "analyze code",
];

const VISUAL_WORK: &[&str] = &[
    "generate_image",
    "create image",
    "design",
    "visual",
    "ui",
    "interface",
    "color",
    "layout",
    "style",
    "aesthetic",
    "art",
    "graphic",
    "icon",
    "logo",
    "banner",
    "picture",
    "photo",
    "image",
];

const EXPLICIT_VISUAL: &[&str] = &[
    "analyze image",
    "review design",
    "visual feedback",
    "art critique",
    "design review",
    "improve visuals",
];

const SHORT_REQUEST_WORDS: usize = 4;

/// Whether `phrase` occurs in `text` (both lowercase).
///
/// Multi-word and snake_case phrases match as substrings. Single words match
/// whole tokens, or token prefixes when the word is long enough to be
/// unambiguous (`function` matches `functions`).
fn mentions(text: &str, phrase: &str) -> bool {
    if phrase.contains([' ', '_']) {
        return text.contains(phrase);
    }
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token == phrase || (phrase.len() >= 4 && token.starts_with(phrase)))
}

fn is_short_operational(request: &str, skip_words: &[&str]) -> bool {
    let lower = request.to_lowercase();
    lower.split_whitespace().count() <= SHORT_REQUEST_WORDS
        && skip_words.iter().any(|word| mentions(&lower, word))
}

/// The request names visual work on its own, before any implementation exists.
pub fn indicates_visual(request: &str) -> bool {
    let lower = request.to_lowercase();
    VISUAL_WORK.iter().any(|w| mentions(&lower, w))
        || EXPLICIT_VISUAL.iter().any(|w| lower.contains(w))
}

/// Code critique is useful when code work was requested and files changed.
pub fn should_run_code_critic(request: &str, response: &str, results: &[OperationResult]) -> bool {
    if is_short_operational(request, CODE_SKIP_WORDS) {
        return false;
    }
    let text = format!("{request} {response}").to_lowercase();
    let has_code_work = CODE_WORK.iter().any(|w| mentions(&text, w));
    let has_file_changes = results.iter().any(|r| {
        matches!(
            r.side_effect,
            Some(PathChanged::Created { .. } | PathChanged::Written { .. })
        )
    });
    has_code_work && has_file_changes
}

/// Art critique is useful for visual work, changed images or explicit visual review.
pub fn should_run_art_critic(request: &str, response: &str, results: &[OperationResult]) -> bool {
    if is_short_operational(request, ART_SKIP_WORDS) {
        return false;
    }
    let text = format!("{request} {response}").to_lowercase();
    let has_visual_work = VISUAL_WORK.iter().any(|w| mentions(&text, w));
    let has_image_changes = results.iter().any(|r| {
        r.side_effect
            .as_ref()
            .is_some_and(|change| is_image_path(change.path()))
    });
    let lower_request = request.to_lowercase();
    let explicit = EXPLICIT_VISUAL.iter().any(|w| lower_request.contains(w));
    has_visual_work || has_image_changes || explicit
}

/// A follow-up refinement pass is warranted after failures or many file changes.
pub fn needs_refinement(results: &[OperationResult]) -> bool {
    let errors = results.iter().filter(|r| !r.success).count();
    let heavy = results
        .iter()
        .filter(|r| {
            matches!(
                r.side_effect,
                Some(
                    PathChanged::Created { .. }
                        | PathChanged::Written { .. }
                        | PathChanged::Generated { .. }
                )
            )
        })
        .count();
    errors > 0 || heavy > 2
}
