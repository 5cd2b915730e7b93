//! ChiefAnalyst - analysis, narrative and final dossier stages

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eyre::Result;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{ANALYSIS_MAX_TOKENS, DOSSIER_MAX_TOKENS, generate, into_list, pretty, render, snippet};
use crate::extract::{Extractor, Shape};
use crate::pipeline::{Agent, AgentKind, FinalArtifact, PlanState, Severity, StageId, StepOutcome};
use crate::prompts::{PromptContext, PromptLoader};
use crate::resilient::ResilientClient;
use crate::tools::ToolRegistry;

const ENGINE_NAME: &str = "dossierflow";

/// Longest narrative excerpt handed to the counter-argument prompt
const PERSPECTIVE_CONTEXT_CHARS: usize = 400;

pub struct ChiefAnalyst {
    client: ResilientClient,
    extractor: Extractor,
    prompts: Arc<PromptLoader>,
    system_prompt: String,
}

impl ChiefAnalyst {
    pub fn new(client: ResilientClient, extractor: Extractor, prompts: Arc<PromptLoader>) -> Result<Self> {
        debug!(model = %client.model(), "ChiefAnalyst::new: called");
        let system_prompt = prompts.load_template("analyst-system")?;
        Ok(Self {
            client,
            extractor,
            prompts,
            system_prompt,
        })
    }

    fn context(state: &PlanState) -> PromptContext {
        let (team_a, team_b) = state.team_names();
        PromptContext {
            sport_key: Some(state.input.sport_key.clone()),
            match_date: state.input.match_date.clone(),
            ..PromptContext::teams(team_a, team_b)
        }
    }

    async fn ask(&self, template: &str, ctx: &PromptContext, max_tokens: u32) -> Result<String, String> {
        let prompt = render(&self.prompts, template, ctx)?;
        generate(&self.client, &self.system_prompt, prompt, max_tokens).await
    }

    async fn initial_analysis(&self, state: &mut PlanState) -> StepOutcome {
        let baseline = state.context.baseline.clone().unwrap_or_else(|| json!({}));
        let ctx = PromptContext {
            baseline: Some(pretty(&baseline)),
            ..Self::context(state)
        };
        match self.ask("initial-analysis", &ctx, ANALYSIS_MAX_TOKENS).await {
            Ok(analysis) => {
                info!(chars = analysis.len(), "ChiefAnalyst::initial_analysis: analysis written");
                state.context.analysis = Some(analysis);
                StepOutcome::Completed
            }
            Err(e) => StepOutcome::failed(e),
        }
    }

    async fn news_synthesis(&self, state: &mut PlanState) -> StepOutcome {
        let analysis = state
            .context
            .analysis
            .clone()
            .unwrap_or_else(|| "Initial analysis missing.".to_string());
        let news = state
            .context
            .baseline_str("key_news_summary_info")
            .unwrap_or("No news summary available.")
            .to_string();
        let ctx = PromptContext {
            news: Some(news),
            ..Self::context(state).with_analysis(analysis)
        };
        match self.ask("news-synthesis", &ctx, ANALYSIS_MAX_TOKENS).await {
            Ok(analysis) => {
                state.context.analysis = Some(analysis);
                StepOutcome::Completed
            }
            Err(e) => StepOutcome::failed(e),
        }
    }

    async fn narrative_synthesis(&self, state: &mut PlanState) -> StepOutcome {
        let analysis = state
            .context
            .analysis
            .clone()
            .unwrap_or_else(|| "Complete analysis from previous stages is missing.".to_string());
        let ctx = Self::context(state).with_analysis(analysis);
        let text = match self.ask("narrative-synthesis", &ctx, ANALYSIS_MAX_TOKENS).await {
            Ok(text) => text,
            Err(e) => return StepOutcome::failed(e),
        };

        let narrative = match self.extractor.extract(Some(&text), Shape::Object).await {
            Some(narrative) => narrative,
            None => {
                warn!("ChiefAnalyst::narrative_synthesis: narrative not structured, keeping raw text");
                state.log(
                    Severity::Warning,
                    StageId::NarrativeSynthesis.as_str(),
                    "Narrative was not valid JSON; using raw text as the summary",
                );
                json!({ "executive_summary_narrative": text })
            }
        };
        state.context.narrative = Some(narrative);
        StepOutcome::Completed
    }

    fn narrative_summary(state: &PlanState) -> String {
        state
            .context
            .narrative
            .as_ref()
            .and_then(|n| n.get("executive_summary_narrative"))
            .and_then(Value::as_str)
            .unwrap_or("Analysis context is missing.")
            .to_string()
    }

    /// Prompt, then extract a list; an unusable list is empty, a failed call is fatal
    async fn list_stage(&self, template: &str, narrative: String, state: &PlanState) -> Result<Vec<Value>, String> {
        let ctx = Self::context(state).with_narrative(narrative);
        let text = self.ask(template, &ctx, ANALYSIS_MAX_TOKENS).await?;
        let items = into_list(self.extractor.extract(Some(&text), Shape::Array).await);
        if items.is_empty() {
            warn!(template, "ChiefAnalyst::list_stage: no items extracted");
        }
        Ok(items)
    }

    async fn hidden_gems(&self, state: &mut PlanState) -> StepOutcome {
        let narrative = Self::narrative_summary(state);
        match self.list_stage("hidden-gems", narrative, state).await {
            Ok(gems) => {
                info!(count = gems.len(), "ChiefAnalyst::hidden_gems: gems identified");
                state.context.hidden_gems = gems;
                StepOutcome::Completed
            }
            Err(e) => StepOutcome::failed(e),
        }
    }

    async fn alternative_perspectives(&self, state: &mut PlanState) -> StepOutcome {
        let narrative = snippet(&Self::narrative_summary(state), PERSPECTIVE_CONTEXT_CHARS);
        match self.list_stage("alternative-perspectives", narrative, state).await {
            Ok(perspectives) => {
                info!(count = perspectives.len(), "ChiefAnalyst::alternative_perspectives: perspectives identified");
                state.context.alternative_perspectives = perspectives;
                StepOutcome::Completed
            }
            Err(e) => StepOutcome::failed(e),
        }
    }

    async fn json_dossier(&self, state: &mut PlanState) -> StepOutcome {
        let (team_a, team_b) = state.team_names();
        let title = state
            .context
            .baseline_str("match_title")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} vs {}", team_a, team_b));
        let gathered = json!({
            "match_title": title,
            "baseline_data": state.context.baseline.clone().unwrap_or_else(|| json!({})),
            "main_narrative": state.context.narrative.clone().unwrap_or_else(|| json!({})),
            "hidden_gems": state.context.hidden_gems,
            "alternative_perspectives": state.context.alternative_perspectives,
        });
        let ctx = PromptContext {
            context: Some(pretty(&gathered)),
            ..Self::context(state)
        };

        let text = match self.ask("dossier-structuring", &ctx, DOSSIER_MAX_TOKENS).await {
            Ok(text) => text,
            Err(e) => return StepOutcome::failed(e),
        };

        match self.extractor.extract(Some(&text), Shape::Object).await {
            // A top-level error key would read as a failed run
            Some(Value::Object(dossier)) if dossier.contains_key("error") => {
                let reported = match &dossier["error"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                StepOutcome::failed(format!("Dossier generation reported an error: {}", reported))
            }
            Some(Value::Object(mut dossier)) => {
                dossier.insert(
                    "provenance".to_string(),
                    json!({
                        "engine_name": ENGINE_NAME,
                        "generation_timestamp_utc": Utc::now().to_rfc3339(),
                        "run_id": state.run_id,
                    }),
                );
                info!(run_id = %state.run_id, fields = dossier.len(), "ChiefAnalyst::json_dossier: dossier generated");
                state.final_artifact = Some(FinalArtifact::Dossier(Value::Object(dossier)));
                StepOutcome::Completed
            }
            _ => StepOutcome::failed(format!(
                "Failed to parse the final dossier JSON. Response snippet: {}",
                snippet(&text, 300)
            )),
        }
    }
}

#[async_trait]
impl Agent for ChiefAnalyst {
    fn kind(&self) -> AgentKind {
        AgentKind::ChiefAnalyst
    }

    async fn execute_step(&self, stage: StageId, state: &mut PlanState, _tools: &ToolRegistry) -> StepOutcome {
        debug!(%stage, run_id = %state.run_id, "ChiefAnalyst::execute_step: called");
        match stage {
            StageId::InitialAnalysis => self.initial_analysis(state).await,
            StageId::NewsSynthesis => self.news_synthesis(state).await,
            StageId::NarrativeSynthesis => self.narrative_synthesis(state).await,
            StageId::HiddenGems => self.hidden_gems(state).await,
            StageId::AlternativePerspectives => self.alternative_perspectives(state).await,
            StageId::JsonDossier => self.json_dossier(state).await,
            other => StepOutcome::failed(format!("{} cannot execute {}", self.kind(), other)),
        }
    }
}
