//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent
///
/// Implementations make exactly one attempt per call and report failures as classified
/// `LlmError`s. Retrying is the job of `ResilientClient`, never of the adapter.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}
