//! Research lookups through an online-search model

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::registry::RESEARCH_TOOL;
use super::{Tool, ToolError, ToolResult};
use crate::cache::TtlCache;
use crate::llm::CompletionRequest;
use crate::resilient::ResilientClient;

const RESEARCH_MAX_TOKENS: u32 = 2048;

/// Answers one research query, caching successful findings by query text
pub struct ResearchTool {
    client: ResilientClient,
    system_prompt: String,
    cache: Arc<TtlCache<Value>>,
    ttl: Duration,
}

impl ResearchTool {
    pub fn new(
        client: ResilientClient,
        system_prompt: impl Into<String>,
        cache: Arc<TtlCache<Value>>,
        ttl: Duration,
    ) -> Self {
        debug!(model = %client.model(), ?ttl, "ResearchTool::new: called");
        Self {
            client,
            system_prompt: system_prompt.into(),
            cache,
            ttl,
        }
    }

    fn cache_key(query: &str) -> String {
        format!("research__{}", query.trim())
    }

    async fn lookup(&self, query: &str) -> Result<Value, ToolError> {
        let request = CompletionRequest::single(&self.system_prompt, query, RESEARCH_MAX_TOKENS);
        let outcome = self.client.complete_text(request).await;
        let attempts = outcome.attempts;
        match outcome.into_result() {
            Ok(text) => {
                info!(attempts, "ResearchTool::lookup: finding received");
                Ok(Value::String(text.trim().to_string()))
            }
            Err(e) => {
                warn!(attempts, error = %e, "ResearchTool::lookup: no finding");
                Err(ToolError::Upstream(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Tool for ResearchTool {
    fn name(&self) -> &'static str {
        RESEARCH_TOOL
    }

    fn description(&self) -> &'static str {
        "Executes a targeted research query against an online search model"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query_string": {"type": "string", "description": "The exact query to research"}
            },
            "required": ["query_string"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let query = match params.get("query_string").and_then(Value::as_str).map(str::trim) {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => {
                warn!("ResearchTool::execute: missing query_string");
                return ToolResult::error(ToolError::MissingParameters(vec!["query_string"]).to_string());
            }
        };
        debug!(query = %query.chars().take(100).collect::<String>(), "ResearchTool::execute: called");

        let key = Self::cache_key(&query);
        match self
            .cache
            .try_get_or_compute(&key, self.ttl, || self.lookup(&query))
            .await
        {
            Ok(finding) => ToolResult::success(finding),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
