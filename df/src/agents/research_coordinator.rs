//! ResearchCoordinator - question generation, parallel research and finding integration

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{ANALYSIS_MAX_TOKENS, generate, into_list, pretty, render, snippet};
use crate::dispatch::Dispatcher;
use crate::extract::{Extractor, Shape};
use crate::pipeline::{
    Agent, AgentKind, PlanState, ResearchFinding, ResearchQuestion, Severity, StageId, StepOutcome,
};
use crate::prompts::{PromptContext, PromptLoader};
use crate::resilient::ResilientClient;
use crate::tools::{RESEARCH_TOOL, ToolRegistry};

pub struct ResearchCoordinator {
    client: ResilientClient,
    extractor: Extractor,
    prompts: Arc<PromptLoader>,
    system_prompt: String,
    dispatcher: Dispatcher,
}

impl ResearchCoordinator {
    /// Fails on a zero concurrency limit or a missing system prompt
    pub fn new(
        client: ResilientClient,
        extractor: Extractor,
        prompts: Arc<PromptLoader>,
        concurrency: usize,
    ) -> Result<Self> {
        debug!(model = %client.model(), concurrency, "ResearchCoordinator::new: called");
        let dispatcher = Dispatcher::new(concurrency)?;
        let system_prompt = prompts.load_template("analyst-system")?;
        Ok(Self {
            client,
            extractor,
            prompts,
            system_prompt,
            dispatcher,
        })
    }

    fn context(state: &PlanState) -> PromptContext {
        let (team_a, team_b) = state.team_names();
        let analysis = state
            .context
            .analysis
            .clone()
            .unwrap_or_else(|| "Analysis context unavailable.".to_string());
        PromptContext::teams(team_a, team_b).with_analysis(analysis)
    }

    async fn question_generation(&self, state: &mut PlanState) -> StepOutcome {
        let prompt = match render(&self.prompts, "question-generation", &Self::context(state)) {
            Ok(prompt) => prompt,
            Err(e) => return StepOutcome::failed(e),
        };
        let text = match generate(&self.client, &self.system_prompt, prompt, ANALYSIS_MAX_TOKENS).await {
            Ok(text) => text,
            Err(e) => return StepOutcome::failed(e),
        };

        let items = into_list(self.extractor.extract(Some(&text), Shape::Array).await);
        let questions: Vec<ResearchQuestion> = items
            .iter()
            .filter_map(|item| {
                let parsed = ResearchQuestion::from_value(item);
                if parsed.is_none() {
                    warn!(%item, "ResearchCoordinator::question_generation: unusable question dropped");
                }
                parsed
            })
            .collect();

        if questions.is_empty() {
            return StepOutcome::failed(format!(
                "Failed to parse research questions. Snippet: {}",
                snippet(&text, 200)
            ));
        }
        info!(count = questions.len(), "ResearchCoordinator::question_generation: questions identified");
        state.context.research_questions = questions;
        StepOutcome::Completed
    }

    async fn research_execution(&self, state: &mut PlanState, tools: &ToolRegistry) -> StepOutcome {
        let questions = state.context.research_questions.clone();
        if questions.is_empty() || !tools.has_tool(RESEARCH_TOOL) {
            state.context.findings = Vec::new();
            return StepOutcome::skipped("No questions or research tool unavailable");
        }

        let results = self
            .dispatcher
            .run(questions, |question: ResearchQuestion| async move {
                let result = tools
                    .execute(RESEARCH_TOOL, json!({ "query_string": question.query }))
                    .await;
                Ok::<_, String>(match result.into_result() {
                    Ok(Value::String(text)) => text,
                    Ok(other) => other.to_string(),
                    Err(e) => format!("Error: {}", e),
                })
            })
            .await;

        let findings: Vec<ResearchFinding> = results
            .into_iter()
            .map(|r| ResearchFinding {
                finding_text: r.outcome.unwrap_or_else(|e| format!("Error: {}", e)),
                question: r.item.question,
                query_used: r.item.query,
            })
            .collect();

        let failed = findings.iter().filter(|f| f.finding_text.starts_with("Error:")).count();
        if failed > 0 {
            warn!(failed, total = findings.len(), "ResearchCoordinator::research_execution: some lookups failed");
            state.log(
                Severity::Warning,
                StageId::ResearchExecution.as_str(),
                format!("{} of {} research lookups failed", failed, findings.len()),
            );
        }
        info!(count = findings.len(), "ResearchCoordinator::research_execution: research finished");
        state.context.findings = findings;
        StepOutcome::Completed
    }

    /// Fold findings in one at a time; a failed call keeps the previous analysis
    async fn finding_integration(&self, state: &mut PlanState) -> StepOutcome {
        if state.context.findings.is_empty() {
            return StepOutcome::skipped("No findings to integrate");
        }

        let base = Self::context(state);
        let mut analysis = state.context.analysis.clone().unwrap_or_default();
        let findings = state.context.findings.clone();
        let mut integrated = 0;

        for finding in &findings {
            let finding_json = serde_json::to_value(finding).map(|v| pretty(&v)).unwrap_or_default();
            let ctx = PromptContext {
                finding: Some(finding_json),
                ..base.clone().with_analysis(analysis.clone())
            };
            let result = match render(&self.prompts, "finding-integration", &ctx) {
                Ok(prompt) => generate(&self.client, &self.system_prompt, prompt, ANALYSIS_MAX_TOKENS).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(revised) => {
                    debug!(question = %snippet(&finding.question, 50), "ResearchCoordinator::finding_integration: integrated");
                    analysis = revised;
                    integrated += 1;
                }
                Err(e) => {
                    warn!(question = %snippet(&finding.question, 50), error = %e, "ResearchCoordinator::finding_integration: keeping previous analysis");
                    state.log(
                        Severity::Warning,
                        StageId::FindingIntegration.as_str(),
                        format!("Could not integrate finding for '{}': {}", finding.question, e),
                    );
                }
            }
        }

        info!(integrated, total = findings.len(), "ResearchCoordinator::finding_integration: findings integrated");
        state.context.analysis = Some(analysis);
        StepOutcome::Completed
    }
}

#[async_trait]
impl Agent for ResearchCoordinator {
    fn kind(&self) -> AgentKind {
        AgentKind::ResearchCoordinator
    }

    async fn execute_step(&self, stage: StageId, state: &mut PlanState, tools: &ToolRegistry) -> StepOutcome {
        debug!(%stage, run_id = %state.run_id, "ResearchCoordinator::execute_step: called");
        match stage {
            StageId::QuestionGeneration => self.question_generation(state).await,
            StageId::ResearchExecution => self.research_execution(state, tools).await,
            StageId::FindingIntegration => self.finding_integration(state).await,
            other => StepOutcome::failed(format!("{} cannot execute {}", self.kind(), other)),
        }
    }
}
