//! LLM provider abstraction used by the Classifier and the agent loop.

mod provider;
mod types;

pub use provider::{HttpJsonProvider, LLMProvider};
pub use types::{
    CompletionOutput, CompletionRequest, CompletionResponse, Message, Role, StreamChunk,
    TokenUsage, ToolCallRequest, ToolSpec,
};
