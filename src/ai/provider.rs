//! The [`LLMProvider`] trait and a generic OpenAI-compatible HTTP implementation.
//!
//! The Classifier and Rule Engine each hold one `Arc<dyn LLMProvider>`,
//! addressed by a `"vendor:model"` string (e.g. `"openai:gpt-4o-mini"`).
//! Provider wiring for specific vendors is out of scope here; this module
//! gives the rest of the crate a stable seam to call through.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::types::{CompletionRequest, CompletionResponse, StreamChunk};

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Run a single non-streaming completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, String>;

    /// Run a streaming completion, yielding incremental text chunks.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, String>>, String>;

    /// Maximum input context size in tokens, if known.
    fn context_limit(&self) -> Option<u32>;

    /// Whether this provider/model combination supports tool calling.
    fn supports_tools(&self) -> bool;

    fn provider_name(&self) -> &str;

    /// Best-effort warmup (e.g. DNS/TLS handshake) to avoid first-call latency.
    async fn warmup(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A generic chat-completions client for any OpenAI-compatible HTTP API.
pub struct HttpJsonProvider {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    context_limit: Option<u32>,
}

impl HttpJsonProvider {
    pub fn new(name: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            base_url: base_url.into(),
            api_key: None,
            client: reqwest::Client::new(),
            context_limit: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_context_limit(mut self, limit: u32) -> Self {
        self.context_limit = Some(limit);
        self
    }
}

#[async_trait]
impl LLMProvider for HttpJsonProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| format!("request failed: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("provider returned {status}: {text}"));
        }

        let value: serde_json::Value =
            resp.json().await.map_err(|e| format!("invalid response body: {e}"))?;

        parse_openai_response(&value)
    }

    async fn stream(
        &self,
        _request: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, String>>, String> {
        Err("streaming is not supported by HttpJsonProvider".to_string())
    }

    fn context_limit(&self) -> Option<u32> {
        self.context_limit
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

fn parse_openai_response(value: &serde_json::Value) -> Result<CompletionResponse, String> {
    use super::types::{CompletionOutput, TokenUsage};

    let choice = value
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| "response missing choices[0]".to_string())?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let usage = value.get("usage").map(|u| TokenUsage {
        input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        cache_read_tokens: 0,
        cache_write_tokens: 0,
    });

    Ok(CompletionResponse { output: CompletionOutput::Text(content), usage: usage.unwrap_or_default() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_openai_response_extracts_text_and_usage() {
        let value = serde_json::json!({
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3},
        });
        let parsed = parse_openai_response(&value).unwrap();
        match parsed.output {
            super::super::types::CompletionOutput::Text(t) => assert_eq!(t, "hello"),
            _ => panic!("expected text output"),
        }
        assert_eq!(parsed.usage.input_tokens, 12);
        assert_eq!(parsed.usage.output_tokens, 3);
    }

    #[test]
    fn parse_openai_response_rejects_missing_choices() {
        let value = serde_json::json!({});
        assert!(parse_openai_response(&value).is_err());
    }
}
