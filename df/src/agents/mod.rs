//! Agents of the standard dossier plan
//!
//! - [`ChiefAnalyst`] writes and restructures the analysis and builds the final dossier
//! - [`ResearchCoordinator`] generates research questions, fans them out and folds the findings back in

mod chief_analyst;
mod research_coordinator;

pub use chief_analyst::ChiefAnalyst;
pub use research_coordinator::ResearchCoordinator;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::llm::CompletionRequest;
use crate::prompts::PromptLoader;
use crate::resilient::ResilientClient;

const ANALYSIS_MAX_TOKENS: u32 = 4096;
const DOSSIER_MAX_TOKENS: u32 = 8192;

/// One primary text-generation call; exhausted retries come back as the error text
async fn generate(client: &ResilientClient, system_prompt: &str, prompt: String, max_tokens: u32) -> Result<String, String> {
    let outcome = client
        .complete_text(CompletionRequest::single(system_prompt, prompt, max_tokens))
        .await;
    let attempts = outcome.attempts;
    outcome.into_result().map_err(|e| {
        warn!(attempts, error = %e, "generate: call failed");
        format!("{} (after {} attempts)", e, attempts)
    })
}

fn render(prompts: &PromptLoader, name: &str, context: &impl Serialize) -> Result<String, String> {
    prompts
        .render(name, context)
        .map_err(|e| format!("Cannot render prompt {}: {}", name, e))
}

/// At most `max` characters, marked when cut
fn snippet(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Extracted arrays become lists; a lone object counts as one item
fn into_list(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}
