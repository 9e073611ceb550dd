//! LLM-driven classification of a tool invocation's risk shape.
//!
//! Mirrors `classify_operation` from the original Python reference
//! implementation: a single structured-output call to a (usually cheap)
//! "classifier model", distinct from the agent's main model.

use std::sync::Arc;

use serde_json::Value;

use crate::ai::{CompletionOutput, CompletionRequest, LLMProvider, Message};
use crate::error::GateError;
use crate::model::OperationClassification;

const CLASSIFICATION_INSTRUCTIONS: &str = r#"You classify a single tool invocation made by an autonomous agent
running inside a sandboxed container. Given the tool name and its arguments,
decide which single operation_type best describes it:

- read_local: reading a file or path inside the agent's own workspace/data dir
- write_local: writing or modifying a file inside the agent's own workspace/data dir
- read_external: reading data from outside the workspace (network fetch, external API read)
- write_external: sending data outside the workspace (network POST, external API write)
- read_sensitive: reading credentials, secrets, or other sensitive material
- write_sensitive: writing or exfiltrating credentials or secrets
- execute: running a shell command or arbitrary code
- credential_access: requesting or using a stored credential
- memory_read: reading the agent's persistent memory store
- memory_write: writing the agent's persistent memory store
- skill_modify: activating, building, or saving a skill

Also produce: a short free-form description of what the operation does, zero
or more free-form category tags (e.g. "network", "filesystem", "destructive"),
and a confidence in [0.0, 1.0]. Respond ONLY with the requested JSON fields."#;

/// Ask `provider` to classify one tool call. Fatal on any LLM or parse failure
/// — an un-classifiable tool call cannot be evaluated by the Rule Engine, and
/// the caller must refuse the tool call rather than guess.
pub async fn classify_operation(
    provider: &Arc<dyn LLMProvider>,
    tool_name: &str,
    args: &Value,
    context: &str,
) -> Result<OperationClassification, GateError> {
    let prompt = format!(
        "tool: {tool_name}\narguments: {args}\ncontext: {context}\n\nClassify this operation."
    );

    let request = CompletionRequest {
        messages: vec![Message::system(CLASSIFICATION_INSTRUCTIONS), Message::user(prompt)],
        tools: Vec::new(),
        max_tokens: Some(400),
        temperature: Some(0.0),
    };

    let response = provider
        .complete(request)
        .await
        .map_err(|e| GateError::ClassifierFailed(format!("completion failed: {e}")))?;

    let text = match response.output {
        CompletionOutput::Text(t) => t,
        CompletionOutput::ToolCalls(_) => {
            return Err(GateError::ClassifierFailed(
                "classifier model returned tool calls instead of a classification".to_string(),
            ));
        }
    };

    parse_classification(&text)
}

/// Parse a classifier response. Accepts either a bare JSON object or one
/// wrapped in a code fence, since models are inconsistent about the latter.
fn parse_classification(text: &str) -> Result<OperationClassification, GateError> {
    let trimmed = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```");

    serde_json::from_str(trimmed.trim())
        .map_err(|e| GateError::ClassifierFailed(format!("could not parse classification JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let text = r#"{"operation_type":"execute","categories":["shell"],"description":"runs ls","confidence":0.9}"#;
        let parsed = parse_classification(text).unwrap();
        assert_eq!(parsed.categories, vec!["shell".to_string()]);
    }

    #[test]
    fn parses_fenced_json() {
        let text = "```json\n{\"operation_type\":\"read_local\",\"categories\":[],\"description\":\"d\",\"confidence\":1.0}\n```";
        let parsed = parse_classification(text).unwrap();
        assert_eq!(parsed.description, "d");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_classification("not json at all").is_err());
    }
}
