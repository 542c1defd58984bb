//! Planner reply parsing and the fixed fallback plan.

use jsonschema::Draft;
use serde_json::Value;

use crate::core::types::{AgentRole, Plan, Step, UnknownRole};

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Instruction placeholder replaced with the previous critique text.
pub const FEEDBACK_PLACEHOLDER: &str = "{FEEDBACK_PLACEHOLDER}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("planner reply contains no JSON plan")]
    NoJson,
    #[error("plan schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error(transparent)]
    UnknownRole(#[from] UnknownRole),
    #[error("plan schema is invalid: {0}")]
    InvalidSchema(String),
}

/// Where the active plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    Planner,
    Fallback,
}

/// Parse a planner reply into a validated plan.
///
/// Accepts a bare JSON array, a fenced ```json block, or the outermost
/// `[...]` found in surrounding prose. An object with a `steps` array is
/// unwrapped.
pub fn parse_plan(reply: &str) -> Result<Plan, PlanError> {
    let value = extract_json(reply).ok_or(PlanError::NoJson)?;
    let value = match value {
        Value::Object(mut map) if map.get("steps").is_some_and(Value::is_array) => {
            map.remove("steps").unwrap_or(Value::Null)
        }
        other => other,
    };
    validate_schema(&value)?;

    let Value::Array(items) = value else {
        return Err(PlanError::Schema(vec!["plan is not an array".to_string()]));
    };
    let mut steps = Vec::with_capacity(items.len());
    for item in items {
        let role = item
            .get("agent_role")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let agent_role: AgentRole = role.parse()?;
        let instruction = item
            .get("instruction")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let is_final = item
            .get("is_final")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        steps.push(Step {
            agent_role,
            instruction,
            is_final,
        });
    }
    Ok(Plan { steps })
}

fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if let Some(body) = fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(body.trim())
    {
        return Some(value);
    }
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

fn validate_schema(instance: &Value) -> Result<(), PlanError> {
    let schema: Value =
        serde_json::from_str(PLAN_SCHEMA).map_err(|err| PlanError::InvalidSchema(err.to_string()))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| PlanError::InvalidSchema(err.to_string()))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(PlanError::Schema(messages))
    }
}

/// Fixed plan used when the planner fails or replies with something unusable.
pub fn fallback_plan(request: &str, include_enhancer: bool, include_art: bool) -> Plan {
    let mut steps = Vec::new();
    if include_enhancer {
        steps.push(Step::new(
            AgentRole::Enhancer,
            "Refine the user request into a precise prompt for the implementer.",
            false,
        ));
    }
    steps.push(Step::new(AgentRole::Implementer, request, false));
    steps.push(Step::new(
        AgentRole::CodeCritic,
        "Review the implementation for quality, security, performance and best practices, and grade it.",
        false,
    ));
    if include_art {
        steps.push(Step::new(
            AgentRole::ArtCritic,
            "Review the visual assets and design of the implementation, and grade them.",
            false,
        ));
    }
    if let Some(last) = steps.last_mut() {
        last.is_final = true;
    }
    Plan { steps }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let plan = parse_plan(
            r#"[{"agent_role":"implementer","instruction":"build","is_final":false},
                {"agent_role":"code_critic","instruction":"review","is_final":true}]"#,
        )
        .expect("plan");
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[1].agent_role, AgentRole::CodeCritic);
        assert!(plan.steps[1].is_final);
    }

    #[test]
    fn parses_fenced_block_and_prose_wrapped_array() {
        let fenced = "Here is the plan:\n```json\n[{\"agent_role\":\"Main Coder\",\"instruction\":\"x\",\"is_final\":true}]\n```\nDone.";
        assert_eq!(
            parse_plan(fenced).expect("fenced").steps[0].agent_role,
            AgentRole::Implementer
        );

        let prose = "Plan: [{\"agent_role\":\"persona\",\"instruction\":\"answer\",\"is_final\":true}] ok";
        assert_eq!(parse_plan(prose).expect("prose").len(), 1);
    }

    #[test]
    fn unwraps_steps_object() {
        let plan = parse_plan(
            r#"{"steps":[{"agent_role":"implementer","instruction":"go","is_final":true}]}"#,
        )
        .expect("plan");
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn rejects_malformed_replies() {
        assert_eq!(parse_plan("I think we should start coding."), Err(PlanError::NoJson));
        assert!(matches!(
            parse_plan(r#"[{"agent_role":"implementer","instruction":"go"}]"#),
            Err(PlanError::Schema(_))
        ));
        assert!(matches!(parse_plan("[]"), Err(PlanError::Schema(_))));
        assert!(matches!(
            parse_plan(r#"[{"agent_role":"janitor","instruction":"sweep","is_final":true}]"#),
            Err(PlanError::UnknownRole(_))
        ));
    }

    #[test]
    fn fallback_marks_last_step_final() {
        let plan = fallback_plan("draw a logo", true, true);
        let roles: Vec<AgentRole> = plan.steps.iter().map(|s| s.agent_role).collect();
        assert_eq!(
            roles,
            vec![
                AgentRole::Enhancer,
                AgentRole::Implementer,
                AgentRole::CodeCritic,
                AgentRole::ArtCritic
            ]
        );
        assert_eq!(plan.steps.iter().filter(|s| s.is_final).count(), 1);
        assert!(plan.steps[3].is_final);
        assert_eq!(plan.steps[1].instruction, "draw a logo");
    }
}
