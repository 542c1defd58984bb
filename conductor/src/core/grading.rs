//! Grade extraction, overall grade and the retry decision.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{AgentRole, ArtifactCritique};

/// Overall grade reported when no critic produced a grade.
pub const DEFAULT_GRADE: u8 = 85;

static GRADE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)GRADE:\s*(\d+)/100").expect("grade regex"));
static GRADE_FALLBACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)grade[:\s]*(\d{1,3})").expect("grade fallback regex"));

/// Pull a 0..=100 grade out of critic text.
///
/// Prefers the `GRADE: NN/100` form and falls back to a number following the
/// word "grade". Values above 100 are discarded.
pub fn extract_grade(text: &str) -> Option<u8> {
    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    };
    if let Some(value) = capture(&GRADE_RE)
        && value <= 100
    {
        return u8::try_from(value).ok();
    }
    capture(&GRADE_FALLBACK_RE)
        .filter(|value| *value <= 100)
        .and_then(|value| u8::try_from(value).ok())
}

/// Floor of the mean of the present grades, or [`DEFAULT_GRADE`].
pub fn overall_grade(grades: &[Option<u8>]) -> u8 {
    let present: Vec<u32> = grades.iter().flatten().map(|g| u32::from(*g)).collect();
    if present.is_empty() {
        return DEFAULT_GRADE;
    }
    let mean = present.iter().sum::<u32>() / present.len() as u32;
    u8::try_from(mean).unwrap_or(100)
}

/// One critic's contribution to a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGrade {
    pub role: AgentRole,
    pub grade: Option<u8>,
    pub critique_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Accept,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub passing_threshold: u8,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            passing_threshold: 70,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Decide what follows an implementer+critique cycle. `attempt` is 1-based.
    pub fn decide(&self, overall: u8, attempt: u32, variants_flagged: bool) -> RetryDecision {
        let failing = overall < self.passing_threshold || variants_flagged;
        if failing && attempt < self.max_attempts {
            RetryDecision::Retry
        } else if overall >= self.passing_threshold {
            RetryDecision::Accept
        } else {
            RetryDecision::Exhausted
        }
    }

    pub fn passes(&self, grade: u8) -> bool {
        grade >= self.passing_threshold
    }
}

/// Which variants to keep after an art critique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSelection {
    pub winner: Option<usize>,
    pub discard: Vec<usize>,
    pub needs_retry: bool,
}

/// Keep the best graded variant (first seen on ties) if it passes, discard the rest.
///
/// When no variant passes, all are discarded and the batch needs a retry. A
/// batch where no variant received a grade is left untouched.
pub fn select_variants(critiques: &[ArtifactCritique], policy: &RetryPolicy) -> VariantSelection {
    let mut best: Option<(usize, u8)> = None;
    for (idx, critique) in critiques.iter().enumerate() {
        if let Some(grade) = critique.grade
            && best.is_none_or(|(_, top)| grade > top)
        {
            best = Some((idx, grade));
        }
    }

    match best {
        None => VariantSelection {
            winner: None,
            discard: Vec::new(),
            needs_retry: false,
        },
        Some((idx, grade)) if policy.passes(grade) => VariantSelection {
            winner: Some(idx),
            discard: (0..critiques.len()).filter(|i| *i != idx).collect(),
            needs_retry: false,
        },
        Some(_) => VariantSelection {
            winner: None,
            discard: (0..critiques.len()).collect(),
            needs_retry: true,
        },
    }
}

const SUMMARY_LINES: usize = 6;
const SUMMARY_CHARS: usize = 600;

/// Shorten critique text to its leading substantive lines.
pub fn condense_critique(text: &str) -> String {
    let mut out = String::new();
    for line in text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !GRADE_RE.is_match(l))
        .take(SUMMARY_LINES)
    {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    if out.chars().count() > SUMMARY_CHARS {
        out = out.chars().take(SUMMARY_CHARS).collect();
        out.push_str("...");
    }
    out
}

/// Implementer instruction for the next attempt.
pub fn retry_instruction(
    original_request: &str,
    base_instruction: &str,
    sub_grades: &[SubGrade],
    overall: u8,
) -> String {
    let mut out = format!(
        "RETRY (Original User Prompt: '{original_request}'):\n\nPREVIOUS ATTEMPT FEEDBACK:\n"
    );
    for sub in sub_grades {
        let grade = sub
            .grade
            .map_or_else(|| "N/A".to_string(), |g| g.to_string());
        out.push_str(&format!("{} Grade: {grade}\n", sub.role.display_name()));
    }
    out.push_str(&format!("Overall Grade: {overall}/100\n"));

    let summaries: Vec<String> = sub_grades
        .iter()
        .map(|sub| (sub, condense_critique(&sub.critique_text)))
        .filter(|(_, summary)| !summary.is_empty())
        .map(|(sub, summary)| format!("{}:\n{summary}", sub.role.display_name()))
        .collect();
    if !summaries.is_empty() {
        out.push_str("\nCRITIQUE SUMMARY:\n");
        out.push_str(&summaries.join("\n\n"));
        out.push('\n');
    }

    out.push_str("\nPlease improve the implementation based on the critique feedback above.\n\n");
    out.push_str(base_instruction.trim());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn critique(path: &str, grade: Option<u8>) -> ArtifactCritique {
        ArtifactCritique {
            path: path.into(),
            critique_text: String::new(),
            grade,
        }
    }

    #[test]
    fn extracts_canonical_and_fallback_grades() {
        assert_eq!(extract_grade("**GRADE: 87/100**\nSolid work."), Some(87));
        assert_eq!(extract_grade("grade: 42 overall"), Some(42));
        assert_eq!(extract_grade("Looks fine to me."), None);
        assert_eq!(extract_grade("GRADE: 150/100"), None);
    }

    #[test]
    fn overall_grade_floors_mean_of_present() {
        assert_eq!(overall_grade(&[Some(65), None]), 65);
        assert_eq!(overall_grade(&[None, None]), DEFAULT_GRADE);
        assert_eq!(overall_grade(&[Some(60), Some(80)]), 70);
        assert_eq!(overall_grade(&[Some(60), Some(81)]), 70);
    }

    #[test]
    fn retry_policy_bounds_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(50, 1, false), RetryDecision::Retry);
        assert_eq!(policy.decide(60, 2, false), RetryDecision::Retry);
        assert_eq!(policy.decide(60, 3, false), RetryDecision::Exhausted);
        assert_eq!(policy.decide(75, 1, false), RetryDecision::Accept);
        assert_eq!(policy.decide(75, 1, true), RetryDecision::Retry);
    }

    #[test]
    fn variants_below_threshold_are_all_discarded() {
        let batch = [
            critique("a.png", Some(55)),
            critique("b.png", Some(62)),
            critique("c.png", Some(58)),
        ];
        let selection = select_variants(&batch, &RetryPolicy::default());
        assert_eq!(selection.winner, None);
        assert_eq!(selection.discard, vec![0, 1, 2]);
        assert!(selection.needs_retry);
    }

    #[test]
    fn best_variant_is_kept_and_ties_go_first() {
        let batch = [
            critique("a.png", Some(55)),
            critique("b.png", Some(81)),
            critique("c.png", Some(81)),
        ];
        let selection = select_variants(&batch, &RetryPolicy::default());
        assert_eq!(selection.winner, Some(1));
        assert_eq!(selection.discard, vec![0, 2]);
        assert!(!selection.needs_retry);
    }

    #[test]
    fn retry_instruction_embeds_request_and_grades() {
        let subs = [
            SubGrade {
                role: AgentRole::CodeCritic,
                grade: Some(50),
                critique_text: "GRADE: 50/100\nMissing error handling.".into(),
            },
            SubGrade {
                role: AgentRole::ArtCritic,
                grade: None,
                critique_text: String::new(),
            },
        ];
        let text = retry_instruction("make a game", "Build the game.", &subs, 50);
        assert!(text.starts_with("RETRY (Original User Prompt: 'make a game')"));
        assert!(text.contains("Code Critic Grade: 50"));
        assert!(text.contains("Art Critic Grade: N/A"));
        assert!(text.contains("Overall Grade: 50/100"));
        assert!(text.contains("Missing error handling."));
        assert!(!text.contains("GRADE: 50/100"));
        assert!(text.ends_with("Build the game."));
    }
}
