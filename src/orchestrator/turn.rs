//! One agent turn: repeatedly call the model, gate and run any tool calls
//! it asks for, and loop until a terminal text answer (or the iteration
//! budget is exhausted).
//!
//! Grounded on the original reference implementation's `_run_agent_turn`:
//! a tool call whose gate requires approval suspends the whole turn rather
//! than failing it — every pending approval for this round is sent to the
//! user at once, and the turn only proceeds once all of them resolve (a
//! disconnect or any non-approval message during this phase denies every
//! outstanding one).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::ai::{CompletionOutput, CompletionRequest, LLMProvider, Message, ToolCallRequest, ToolSpec};
use crate::model::{OperationClassification, SessionState, UsageCounters};

use super::tools::{execute_tool, ToolContext, ToolOutcome};

/// One tool call awaiting a user decision.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub tool_call_id: String,
    pub tool: String,
    pub args: Value,
    pub classification: OperationClassification,
    pub triggered_rules: Vec<String>,
    pub descriptions: Vec<String>,
}

/// Implemented by the User Channel: surface a batch of approval requests
/// and wait for the user's decision on every one of them. A disconnect or
/// any unrelated message while waiting must resolve every outstanding
/// request as denied rather than leave the turn hanging.
#[async_trait]
pub trait ApprovalResolver: Send + Sync {
    async fn request_approvals(&self, requests: Vec<ApprovalRequest>) -> HashMap<String, bool>;
}

/// Implemented by the User Channel: stream tool-call notices to the user as
/// they run, independent of whether they need approval.
#[async_trait]
pub trait ToolCallObserver: Send + Sync {
    async fn on_tool_call(&self, tool: &str, args: &Value, detail: &str);
}

pub enum TurnOutcome {
    Done { content: String, usage: UsageCounters },
    Error(String),
}

const MAX_ITERATIONS_DEFAULT: u32 = 20;

/// Run one full agent turn for `session_state`, starting from `history`
/// plus `user_message`, looping through tool calls until a terminal text
/// answer or the iteration budget is exhausted.
pub async fn run_agent_turn(
    ctx: &ToolContext,
    main_provider: &Arc<dyn LLMProvider>,
    session_state: &mut SessionState,
    system_prompt: &str,
    history: &[Message],
    user_message: &str,
    tools: Vec<ToolSpec>,
    resolver: &dyn ApprovalResolver,
    observer: &dyn ToolCallObserver,
    max_iterations: u32,
) -> TurnOutcome {
    let mut messages = vec![Message::system(system_prompt)];
    messages.extend(history.iter().cloned());
    messages.push(Message::user(user_message));

    let mut usage = UsageCounters::default();
    let max_iterations = if max_iterations == 0 { MAX_ITERATIONS_DEFAULT } else { max_iterations };

    for _ in 0..max_iterations {
        let request = CompletionRequest {
            messages: messages.clone(),
            tools: tools.clone(),
            max_tokens: None,
            temperature: None,
        };

        let response = match main_provider.complete(request).await {
            Ok(r) => r,
            Err(e) => return TurnOutcome::Error(format!("model call failed: {e}")),
        };

        usage.input += response.usage.input_tokens;
        usage.output += response.usage.output_tokens;
        usage.cache_read += response.usage.cache_read_tokens;
        usage.cache_write += response.usage.cache_write_tokens;
        usage.requests += 1;

        match response.output {
            CompletionOutput::Text(text) => return TurnOutcome::Done { content: text, usage },
            CompletionOutput::ToolCalls(calls) => {
                let tool_messages = match run_tool_calls(ctx, &mut *session_state, calls, resolver, observer).await {
                    Ok(messages) => messages,
                    Err(e) => return TurnOutcome::Error(e),
                };
                messages.extend(tool_messages);
            }
        }
    }

    TurnOutcome::Error("exceeded maximum tool-call iterations for this turn".to_string())
}

/// Dispatch every tool call the model asked for in one response, gating
/// each; any that need approval are batched into a single round-trip to
/// the user before the turn proceeds.
async fn run_tool_calls(
    ctx: &ToolContext,
    session_state: &mut SessionState,
    calls: Vec<ToolCallRequest>,
    resolver: &dyn ApprovalResolver,
    observer: &dyn ToolCallObserver,
) -> Result<Vec<Message>, String> {
    let mut results: HashMap<String, String> = HashMap::new();
    let mut pending_requests = Vec::new();
    let mut pending_calls = Vec::new();

    for call in &calls {
        let detail = crate::gate::format_call_detail(&call.name, &call.arguments);
        observer.on_tool_call(&call.name, &call.arguments, &detail).await;

        match execute_tool(ctx, &mut *session_state, &call.name, &call.arguments, false).await {
            Ok(ToolOutcome::Completed(output)) => {
                results.insert(call.id.clone(), output);
            }
            Ok(ToolOutcome::Blocked { descriptions, .. }) => {
                let reason = if descriptions.is_empty() {
                    "This operation is blocked by policy.".to_string()
                } else {
                    format!("Blocked by policy: {}", descriptions.join("; "))
                };
                results.insert(call.id.clone(), reason);
            }
            Ok(ToolOutcome::NeedsApproval { classification, triggered_rules, descriptions, .. }) => {
                pending_requests.push(ApprovalRequest {
                    tool_call_id: call.id.clone(),
                    tool: call.name.clone(),
                    args: call.arguments.clone(),
                    classification,
                    triggered_rules,
                    descriptions,
                });
                pending_calls.push(call.clone());
            }
            Err(e) => {
                results.insert(call.id.clone(), format!("Error: {e}"));
            }
        }
    }

    if !pending_requests.is_empty() {
        let decisions = resolver.request_approvals(pending_requests).await;
        for call in pending_calls {
            let approved = decisions.get(&call.id).copied().unwrap_or(false);
            if !approved {
                results.insert(call.id.clone(), "Approval denied.".to_string());
                continue;
            }
            match execute_tool(ctx, &mut *session_state, &call.name, &call.arguments, true).await {
                Ok(ToolOutcome::Completed(output)) => {
                    results.insert(call.id.clone(), output);
                }
                Ok(_) => {
                    results.insert(call.id.clone(), "Error: tool did not complete after approval.".to_string());
                }
                Err(e) => {
                    results.insert(call.id.clone(), format!("Error: {e}"));
                }
            }
        }
    }

    let mut messages = Vec::with_capacity(calls.len());
    for call in &calls {
        let output = results.remove(&call.id).unwrap_or_else(|| "Error: tool call produced no result.".to_string());
        messages.push(Message::tool_result(output, call.id.clone()));
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AutoDenyResolver;
    #[async_trait]
    impl ApprovalResolver for AutoDenyResolver {
        async fn request_approvals(&self, requests: Vec<ApprovalRequest>) -> HashMap<String, bool> {
            requests.into_iter().map(|r| (r.tool_call_id, false)).collect()
        }
    }

    struct NoopObserver;
    #[async_trait]
    impl ToolCallObserver for NoopObserver {
        async fn on_tool_call(&self, _tool: &str, _args: &Value, _detail: &str) {}
    }

    #[test]
    fn resolver_and_observer_are_object_safe() {
        let _resolver: &dyn ApprovalResolver = &AutoDenyResolver;
        let _observer: &dyn ToolCallObserver = &NoopObserver;
    }
}
