//! The Rule Engine: evaluates a classified operation against `rules.yaml`.
//!
//! Mirrors `check_rules` from the original Python reference implementation.
//! For every enabled rule, in file order:
//!   1. Decide whether the rule's *trigger* is met. `trigger == "always"` is
//!      met unconditionally; a rule already in `session_state.activated_rules`
//!      stays met (activation is monotonic within a session); otherwise an
//!      LLM evaluator judges trigger-met against the classification.
//!   2. If newly met this call, record it as newly activated.
//!   3. If met, an LLM evaluator judges whether the rule's *effect* applies
//!      to this specific operation.
//!   4. If the effect applies: `mode = block` denies the call outright;
//!      `mode = approve` requires interactive approval. A block from any
//!      rule overrides an approval requirement from any other rule.
//!
//! Failure handling: an evaluator call that errors or returns unparseable
//! output is treated as "trigger not met" (fail-closed — a broken evaluator
//! can never silently activate a block) and, symmetrically, as "effect does
//! not apply" (fail-open — a broken evaluator can never silently block or
//! require approval for an already-inactive rule).

use std::sync::Arc;

use crate::ai::{CompletionOutput, CompletionRequest, LLMProvider, Message};
use crate::model::{OperationClassification, Rule, RuleCheckResult, RuleMode, SessionState};

const EVALUATOR_INSTRUCTIONS: &str =
    "You decide whether a single yes/no natural-language predicate holds for \
     a classified agent operation. Respond with exactly one word: \"yes\" or \"no\".";

/// Thin wrapper around an [`LLMProvider`] used only to answer yes/no
/// predicates about triggers and effects.
pub struct Evaluator {
    provider: Arc<dyn LLMProvider>,
}

impl Evaluator {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    async fn ask(&self, predicate: &str, classification: &OperationClassification) -> Result<bool, String> {
        let prompt = format!(
            "predicate: {predicate}\noperation_type: {:?}\ncategories: {:?}\ndescription: {}\n\nDoes the predicate hold?",
            classification.operation_type, classification.categories, classification.description
        );

        let request = CompletionRequest {
            messages: vec![Message::system(EVALUATOR_INSTRUCTIONS), Message::user(prompt)],
            tools: Vec::new(),
            max_tokens: Some(8),
            temperature: Some(0.0),
        };

        let response = self.provider.complete(request).await?;
        let text = match response.output {
            CompletionOutput::Text(t) => t,
            CompletionOutput::ToolCalls(_) => return Err("evaluator returned tool calls".to_string()),
        };

        parse_yes_no(&text)
    }
}

fn parse_yes_no(text: &str) -> Result<bool, String> {
    let normalized = text.trim().trim_matches(|c: char| !c.is_alphabetic()).to_lowercase();
    match normalized.as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        other => Err(format!("unparseable yes/no response: {other:?}")),
    }
}

/// Run the Rule Engine over `rules` for one classified operation.
///
/// `session_state.activated_rules` is mutated in place the moment a
/// non-`always` trigger is newly met, mirroring the original reference
/// implementation's `check_rules`: activation records that the trigger
/// condition has become true in the world, independent of whether this
/// particular operation ends up blocked or approved. The caller is
/// responsible for persisting `session_state` afterward.
pub async fn check_rules(
    evaluator: &Evaluator,
    rules: &[Rule],
    session_state: &mut SessionState,
    classification: &OperationClassification,
) -> RuleCheckResult {
    let mut result = RuleCheckResult::default();

    for rule in rules {
        if session_state.disabled_rules.iter().any(|id| id == &rule.id) {
            continue;
        }

        let already_activated = session_state.activated_rules.iter().any(|id| id == &rule.id);
        let always = rule.trigger_is_always();

        let trigger_met = if always || already_activated {
            true
        } else {
            evaluator.ask(&rule.trigger, classification).await.unwrap_or(false)
        };

        if trigger_met && !already_activated && !always {
            result.newly_activated_rules.push(rule.id.clone());
            session_state.activate_rule(&rule.id);
        }

        let is_active = always || session_state.activated_rules.iter().any(|id| id == &rule.id);
        if !is_active {
            continue;
        }

        let effect_applies = evaluator.ask(&rule.effect, classification).await.unwrap_or(false);
        if !effect_applies {
            continue;
        }

        result.triggered_rules.push(rule.id.clone());
        if !rule.description.is_empty() {
            result.descriptions.push(rule.description.clone());
        }

        match rule.mode {
            RuleMode::Block => result.blocked = true,
            RuleMode::Approve => result.needs_approval = true,
        }
    }

    if result.blocked {
        result.needs_approval = false;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification() -> OperationClassification {
        OperationClassification {
            operation_type: crate::model::OperationType::Execute,
            categories: vec!["shell".to_string()],
            description: "runs a shell command".to_string(),
            confidence: 0.9,
        }
    }

    fn session() -> SessionState {
        SessionState::new("abc123456789".to_string(), "cli".to_string(), String::new())
    }

    fn rule(id: &str, trigger: &str, effect: &str, mode: RuleMode) -> Rule {
        Rule { id: id.to_string(), trigger: trigger.to_string(), effect: effect.to_string(), mode, description: format!("{id} description") }
    }

    #[test]
    fn parse_yes_no_accepts_variants() {
        assert!(parse_yes_no("Yes.").unwrap());
        assert!(parse_yes_no(" YES ").unwrap());
        assert!(!parse_yes_no("no.").unwrap());
        assert!(parse_yes_no("maybe").is_err());
    }

    #[tokio::test]
    async fn always_trigger_with_failing_effect_evaluator_is_fail_open() {
        struct FailingProvider;
        #[async_trait::async_trait]
        impl LLMProvider for FailingProvider {
            async fn complete(&self, _req: CompletionRequest) -> Result<crate::ai::CompletionResponse, String> {
                Err("boom".to_string())
            }
            async fn stream(
                &self,
                _req: CompletionRequest,
            ) -> Result<futures::stream::BoxStream<'static, Result<crate::ai::StreamChunk, String>>, String> {
                Err("unsupported".to_string())
            }
            fn context_limit(&self) -> Option<u32> {
                None
            }
            fn supports_tools(&self) -> bool {
                false
            }
            fn provider_name(&self) -> &str {
                "failing"
            }
        }

        let evaluator = Evaluator::new(Arc::new(FailingProvider));
        let rules = vec![rule("r1", "always", "this never applies", RuleMode::Block)];
        let mut state = session();
        let result = check_rules(&evaluator, &rules, &mut state, &classification()).await;

        // "always" triggers are never recorded as activations (they're
        // already unconditionally active); only the fail-open effect
        // evaluation is under test here.
        assert!(result.newly_activated_rules.is_empty());
        assert!(!result.blocked);
        assert!(result.triggered_rules.is_empty());
    }

    #[tokio::test]
    async fn non_always_trigger_activates_and_persists_across_calls() {
        struct YesProvider;
        #[async_trait::async_trait]
        impl LLMProvider for YesProvider {
            async fn complete(&self, _req: CompletionRequest) -> Result<crate::ai::CompletionResponse, String> {
                Ok(crate::ai::CompletionResponse {
                    output: CompletionOutput::Text("yes".to_string()),
                    usage: Default::default(),
                })
            }
            async fn stream(
                &self,
                _req: CompletionRequest,
            ) -> Result<futures::stream::BoxStream<'static, Result<crate::ai::StreamChunk, String>>, String> {
                Err("unsupported".to_string())
            }
            fn context_limit(&self) -> Option<u32> {
                None
            }
            fn supports_tools(&self) -> bool {
                false
            }
            fn provider_name(&self) -> &str {
                "yes"
            }
        }

        let evaluator = Evaluator::new(Arc::new(YesProvider));
        let rules = vec![rule("r1", "the agent read untrusted data", "block everything", RuleMode::Block)];
        let mut state = session();

        let first = check_rules(&evaluator, &rules, &mut state, &classification()).await;
        assert_eq!(first.newly_activated_rules, vec!["r1".to_string()]);
        assert!(state.activated_rules.contains(&"r1".to_string()));
        assert!(first.blocked);

        // Second call: trigger is already activated, so it's never
        // reported as newly activated again, but the effect still applies.
        let second = check_rules(&evaluator, &rules, &mut state, &classification()).await;
        assert!(second.newly_activated_rules.is_empty());
        assert!(second.blocked);
    }

    #[test]
    fn block_overrides_approval() {
        let mut result = RuleCheckResult::default();
        result.needs_approval = true;
        result.blocked = true;
        if result.blocked {
            result.needs_approval = false;
        }
        assert!(!result.needs_approval);
        assert!(result.blocked);
    }
}
