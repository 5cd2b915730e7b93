//! Extraction with a single-shot repair fallback

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ParseFailure, Shape, parse_shaped};
use crate::llm::CompletionRequest;
use crate::resilient::ResilientClient;

pub const REPAIR_SYSTEM_PROMPT: &str = "You are a JSON syntax correction utility. The user provides broken JSON. \
     Return ONLY the corrected, syntactically valid JSON. If it is impossible to fix, return an empty object {}.";

const REPAIR_MAX_TOKENS: u32 = 4096;

/// Structured-output extractor
///
/// Without a repairer this is a pure parser. With one, a syntax failure triggers exactly one
/// repair call whose output is parsed without further repair.
#[derive(Clone, Default)]
pub struct Extractor {
    repairer: Option<ResilientClient>,
}

impl Extractor {
    pub fn new(repairer: ResilientClient) -> Self {
        Self {
            repairer: Some(repairer),
        }
    }

    /// Extractor that never calls a model
    pub fn local() -> Self {
        Self { repairer: None }
    }

    /// Recover a value of `shape` from `raw`, or `None`
    pub async fn extract(&self, raw: Option<&str>, shape: Shape) -> Option<Value> {
        let Some(raw) = raw else {
            debug!(?shape, "Extractor::extract: no input");
            return None;
        };
        debug!(?shape, raw_len = raw.len(), "Extractor::extract: called");

        match parse_shaped(raw, shape) {
            Ok(value) => Some(value),
            Err(ParseFailure::Empty) => {
                warn!(?shape, "Extractor::extract: input empty after stripping fences");
                None
            }
            Err(ParseFailure::Shape { found }) => {
                warn!(?shape, %found, "Extractor::extract: parsed value has the wrong shape");
                None
            }
            Err(ParseFailure::Syntax { fragment, error }) => {
                warn!(?shape, %error, fragment_len = fragment.len(), "Extractor::extract: parse failed");
                self.repair(&fragment, shape).await
            }
        }
    }

    async fn repair(&self, fragment: &str, shape: Shape) -> Option<Value> {
        let Some(repairer) = &self.repairer else {
            debug!("Extractor::repair: no repair model configured");
            return None;
        };

        info!(model = %repairer.model(), "Extractor::repair: attempting repair");
        let request = CompletionRequest::single(REPAIR_SYSTEM_PROMPT, fragment, REPAIR_MAX_TOKENS).with_temperature(0.0);
        let repaired = match repairer.complete_text(request).await.into_result() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Extractor::repair: repair call failed");
                return None;
            }
        };

        match parse_shaped(&repaired, shape) {
            // An empty object is the repairer saying the input is unfixable
            Ok(Value::Object(map)) if map.is_empty() => {
                warn!("Extractor::repair: repairer gave up");
                None
            }
            Ok(value) => {
                info!("Extractor::repair: repair succeeded");
                Some(value)
            }
            Err(e) => {
                warn!(failure = ?e, "Extractor::repair: repaired text still unusable");
                None
            }
        }
    }
}
