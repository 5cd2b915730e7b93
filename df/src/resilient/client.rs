//! LLM client wrapped in per-call timeouts and classified retries

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{CallOutcome, RetryPolicy, call_with_retry};
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};

/// An `LlmClient` that never fails with a panic or a bare error
///
/// Every attempt is bounded by `call_timeout`; retryable failures are retried under the
/// policy. Callers always receive a `CallOutcome`.
#[derive(Clone)]
pub struct ResilientClient {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl ResilientClient {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        debug!(model = %client.model(), ?policy, "ResilientClient::new: called");
        Self {
            client,
            policy,
            call_timeout: None,
        }
    }

    /// Bound every single attempt by `timeout`
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issue the request with retries
    pub async fn call(&self, request: CompletionRequest) -> CallOutcome<CompletionResponse> {
        debug!(model = %self.client.model(), "ResilientClient::call: called");
        let label = format!("llm:{}", self.client.model());
        call_with_retry(&self.policy, &label, |_attempt| self.attempt(request.clone())).await
    }

    /// Issue the request and return its text; a blank response is a data-quality failure
    pub async fn complete_text(&self, request: CompletionRequest) -> CallOutcome<String> {
        debug!(model = %self.client.model(), "ResilientClient::complete_text: called");
        let label = format!("llm:{}", self.client.model());
        call_with_retry(&self.policy, &label, |_attempt| {
            let request = request.clone();
            async move {
                let response = self.attempt(request).await?;
                response
                    .non_empty_text()
                    .map(|s| s.to_string())
                    .ok_or(LlmError::EmptyResponse)
            }
        })
        .await
    }

    async fn attempt(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.client.complete(request))
                .await
                .map_err(|_| LlmError::Timeout(limit))?,
            None => self.client.complete(request).await,
        }
    }
}
