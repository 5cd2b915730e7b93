//! Embedded prompts
//!
//! Compiled into the binary from the `.pmt` files at build time.

use tracing::debug;

pub const ANALYST_SYSTEM: &str = include_str!("../../prompts/analyst-system.pmt");
pub const RESEARCH_SYSTEM: &str = include_str!("../../prompts/research-system.pmt");
pub const INITIAL_ANALYSIS: &str = include_str!("../../prompts/initial-analysis.pmt");
pub const NEWS_SYNTHESIS: &str = include_str!("../../prompts/news-synthesis.pmt");
pub const QUESTION_GENERATION: &str = include_str!("../../prompts/question-generation.pmt");
pub const FINDING_INTEGRATION: &str = include_str!("../../prompts/finding-integration.pmt");
pub const NARRATIVE_SYNTHESIS: &str = include_str!("../../prompts/narrative-synthesis.pmt");
pub const HIDDEN_GEMS: &str = include_str!("../../prompts/hidden-gems.pmt");
pub const ALTERNATIVE_PERSPECTIVES: &str = include_str!("../../prompts/alternative-perspectives.pmt");
pub const DOSSIER_STRUCTURING: &str = include_str!("../../prompts/dossier-structuring.pmt");
pub const NEWS_SUMMARY_QUERY: &str = include_str!("../../prompts/news-summary-query.pmt");
pub const PREDICTION_QUERY: &str = include_str!("../../prompts/prediction-query.pmt");

/// Names of every embedded template
pub const NAMES: &[&str] = &[
    "analyst-system",
    "research-system",
    "initial-analysis",
    "news-synthesis",
    "question-generation",
    "finding-integration",
    "narrative-synthesis",
    "hidden-gems",
    "alternative-perspectives",
    "dossier-structuring",
    "news-summary-query",
    "prediction-query",
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    let found = match name {
        "analyst-system" => ANALYST_SYSTEM,
        "research-system" => RESEARCH_SYSTEM,
        "initial-analysis" => INITIAL_ANALYSIS,
        "news-synthesis" => NEWS_SYNTHESIS,
        "question-generation" => QUESTION_GENERATION,
        "finding-integration" => FINDING_INTEGRATION,
        "narrative-synthesis" => NARRATIVE_SYNTHESIS,
        "hidden-gems" => HIDDEN_GEMS,
        "alternative-perspectives" => ALTERNATIVE_PERSPECTIVES,
        "dossier-structuring" => DOSSIER_STRUCTURING,
        "news-summary-query" => NEWS_SUMMARY_QUERY,
        "prediction-query" => PREDICTION_QUERY,
        _ => {
            debug!("get_embedded: no match found");
            return None;
        }
    };
    Some(found)
}
