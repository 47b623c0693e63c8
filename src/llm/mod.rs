//! Minimal LLM client used by the assisted activation path.
//!
//! Only the pieces the engine needs: a provider-agnostic [`LLMClient`]
//! trait, request/response types, and an Anthropic implementation.

mod client;
mod types;

pub use client::{AnthropicClient, LLMClient};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, StopReason, TokenUsage,
};
