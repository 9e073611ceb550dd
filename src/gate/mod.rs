//! The Operation Gate: classify a tool call, then check it against rules.

mod classifier;
mod engine;

pub use classifier::classify_operation;
pub use engine::{check_rules, Evaluator};

use std::sync::Arc;

use serde_json::Value;

use crate::ai::LLMProvider;
use crate::error::GateError;
use crate::model::{OperationClassification, Rule, RuleCheckResult, SessionState};

/// Outcome of gating a single tool call, combining the classification (for
/// audit/approval-request display) with the Rule Engine's verdict.
pub struct GateVerdict {
    pub classification: OperationClassification,
    pub check: RuleCheckResult,
}

impl GateVerdict {
    pub fn is_blocked(&self) -> bool {
        self.check.blocked
    }

    pub fn needs_approval(&self) -> bool {
        self.check.needs_approval
    }
}

/// Classify `tool_name(args)` and evaluate it against `rules` for `session_state`.
///
/// This is the single entry point every tool implementation calls before
/// taking effect, mirroring `_gate()` in the original agent loop.
pub async fn gate(
    classifier_provider: &Arc<dyn LLMProvider>,
    evaluator: &Evaluator,
    rules: &[Rule],
    session_state: &mut SessionState,
    tool_name: &str,
    args: &Value,
    context: &str,
) -> Result<GateVerdict, GateError> {
    let classification = classify_operation(classifier_provider, tool_name, args, context).await?;
    let check = check_rules(evaluator, rules, session_state, &classification).await;
    Ok(GateVerdict { classification, check })
}

/// Build the truncated, human-readable detail string shown alongside an
/// approval request (and echoed to the verbose channel when enabled).
///
/// Each argument's debug representation is truncated at 60 characters, then
/// the assembled string is truncated at 200.
pub fn format_call_detail(tool_name: &str, args: &Value) -> String {
    let arg_strs: Vec<String> = match args {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let rendered = truncate(&v.to_string(), 60);
                format!("{k}={rendered}")
            })
            .collect(),
        other => vec![truncate(&other.to_string(), 60)],
    };

    let joined = format!("{tool_name}({})", arg_strs.join(", "));
    truncate(&joined, 200)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        truncated.push_str("...");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_call_detail_truncates_long_args() {
        let args = serde_json::json!({"content": "x".repeat(100)});
        let detail = format_call_detail("write", &args);
        assert!(detail.len() <= 200);
        assert!(detail.contains("..."));
    }

    #[test]
    fn format_call_detail_short_args_untouched() {
        let args = serde_json::json!({"path": "a.txt"});
        assert_eq!(format_call_detail("read", &args), "read(path=\"a.txt\")");
    }
}
