//! Pipeline - the entry point that turns a request into a finished PlanState

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info};

use super::agent::AgentRegistry;
use super::executor::PlanExecutor;
use super::stage::Plan;
use super::state::{PREREQUISITE_STAGE, PipelineInput, PlanState, REQUEST_STAGE, Severity};
use crate::agents::{ChiefAnalyst, ResearchCoordinator};
use crate::cache::TtlCache;
use crate::config::Config;
use crate::extract::Extractor;
use crate::llm::create_client;
use crate::prompts::PromptLoader;
use crate::resilient::ResilientClient;
use crate::tools::{BaselineDataTool, ResearchBaselineSource, ResearchTool, ToolRegistry};

/// Executor, tools and the finished-dossier cache for one process
pub struct Pipeline {
    executor: PlanExecutor,
    tools: ToolRegistry,
    dossier_cache: TtlCache<PlanState>,
    dossier_ttl: Duration,
    deadline: Option<Duration>,
}

impl Pipeline {
    pub fn new(executor: PlanExecutor, tools: ToolRegistry, dossier_cache: TtlCache<PlanState>, dossier_ttl: Duration) -> Self {
        debug!(?dossier_ttl, "Pipeline::new: called");
        Self {
            executor,
            tools,
            dossier_cache,
            dossier_ttl,
            deadline: None,
        }
    }

    /// Bound every run by `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Wire the standard plan, agents and tools from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        debug!("Pipeline::from_config: called");
        let prompts = Arc::new(PromptLoader::new(config.prompts.dir.as_ref()));
        let policy = config.retry.policy();
        let concurrency = config.dispatch.concurrency_limit;

        let primary = ResilientClient::new(
            create_client(&config.llm).context("Failed to create analysis client")?,
            policy.clone(),
        )
        .with_call_timeout(config.llm.timeout());
        let research = ResilientClient::new(
            create_client(&config.research).context("Failed to create research client")?,
            policy.clone(),
        )
        .with_call_timeout(config.research.timeout());
        let repair = ResilientClient::new(
            create_client(&config.repair).context("Failed to create repair client")?,
            policy,
        )
        .with_call_timeout(config.repair.timeout());
        let extractor = Extractor::new(repair);

        let research_tool = Arc::new(ResearchTool::new(
            research,
            prompts.load_template("research-system")?,
            Arc::new(TtlCache::new("research", config.cache.capacity)),
            config.cache.research_ttl(),
        ));
        let baseline_tool = Arc::new(BaselineDataTool::new(
            Arc::new(ResearchBaselineSource::new(research_tool.clone(), prompts.clone(), concurrency)),
            Arc::new(TtlCache::new("baseline", config.cache.capacity)),
            config.cache.baseline_ttl(),
        ));
        let tools = ToolRegistry::empty().with(research_tool).with(baseline_tool);

        let agents = AgentRegistry::new()
            .with(Arc::new(ChiefAnalyst::new(primary.clone(), extractor.clone(), prompts.clone())?))
            .with(Arc::new(ResearchCoordinator::new(primary, extractor, prompts, concurrency)?));
        let executor = PlanExecutor::new(Plan::standard(), agents)?;

        let pipeline = Self::new(
            executor,
            tools,
            TtlCache::new("dossier", config.cache.dossier_capacity),
            config.cache.dossier_ttl(),
        );
        Ok(match config.pipeline.deadline() {
            Some(deadline) => pipeline.with_deadline(deadline),
            None => pipeline,
        })
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn cache_key(input: &PipelineInput) -> String {
        format!("dossier_v1_{}_{}", input.sport_key, input.match_id)
    }

    /// Run the plan for `request`; always returns a state, never an error
    pub async fn run_pipeline(&self, request: Value) -> PlanState {
        let input = PipelineInput::from_request(&request);
        debug!(match_id = %input.match_id, sport_key = %input.sport_key, "Pipeline::run_pipeline: called");

        let missing = input.missing_fields();
        if !missing.is_empty() {
            let message = format!("Missing required request fields: {}", missing.join(", "));
            error!(%message, "Pipeline::run_pipeline: rejected request");
            let mut state = PlanState::new(input);
            state.log(Severity::Error, REQUEST_STAGE, message.clone());
            state.fail(REQUEST_STAGE, message);
            return state;
        }

        let key = Self::cache_key(&input);
        if let Some(mut cached) = self.dossier_cache.get(&key).await {
            info!(%key, run_id = %cached.run_id, "Pipeline::run_pipeline: serving cached dossier");
            cached.from_cache = true;
            return cached;
        }

        let mut state = PlanState::new(input);
        match self.deadline {
            Some(deadline) => {
                let finished = tokio::time::timeout(deadline, self.executor.run(&mut state, &self.tools)).await;
                if finished.is_err() {
                    let stage = state
                        .current_stage
                        .map(|s| s.as_str())
                        .unwrap_or(PREREQUISITE_STAGE)
                        .to_string();
                    let message = format!("Pipeline timed out after {}ms", deadline.as_millis());
                    error!(run_id = %state.run_id, %stage, "Pipeline::run_pipeline: run deadline elapsed");
                    state.log(Severity::Error, stage.clone(), message.clone());
                    state.fail(stage, message);
                    state.current_stage = None;
                }
            }
            None => self.executor.run(&mut state, &self.tools).await,
        }

        if state.is_error() {
            info!(run_id = %state.run_id, "Pipeline::run_pipeline: run failed, not caching");
        } else {
            self.dossier_cache.set(&key, state.clone(), self.dossier_ttl).await;
            info!(run_id = %state.run_id, %key, "Pipeline::run_pipeline: dossier cached");
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::agent::{Agent, StepOutcome};
    use crate::pipeline::stage::{AgentKind, StageDescriptor, StageId};
    use crate::pipeline::state::FinalArtifact;
    use crate::tools::{BASELINE_TOOL, Tool, ToolResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DossierAgent {
        runs: Arc<AtomicUsize>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl Agent for DossierAgent {
        fn kind(&self) -> AgentKind {
            AgentKind::ChiefAnalyst
        }

        async fn execute_step(&self, _stage: StageId, state: &mut PlanState, _tools: &ToolRegistry) -> StepOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return StepOutcome::failed("model unavailable");
            }
            state.final_artifact = Some(FinalArtifact::Dossier(json!({"match_title": "A vs B"})));
            StepOutcome::Completed
        }
    }

    struct Baseline;

    #[async_trait]
    impl Tool for Baseline {
        fn name(&self) -> &'static str {
            BASELINE_TOOL
        }

        fn description(&self) -> &'static str {
            "stub"
        }

        fn input_schema(&self) -> Value {
            json!({})
        }

        async fn execute(&self, _params: Value) -> ToolResult {
            ToolResult::success(json!({}))
        }
    }

    fn pipeline(fail: bool, delay: Duration) -> (Pipeline, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let agents = AgentRegistry::new().with(Arc::new(DossierAgent {
            runs: runs.clone(),
            fail,
            delay,
        }));
        let plan = Plan::new(vec![
            StageDescriptor::owned(StageId::InitialAnalysis),
            StageDescriptor::owned(StageId::JsonDossier),
        ])
        .unwrap();
        let executor = PlanExecutor::new(plan, agents).unwrap();
        let tools = ToolRegistry::empty().with(Arc::new(Baseline));
        (
            Pipeline::new(executor, tools, TtlCache::new("dossier", 4), Duration::from_secs(60)),
            runs,
        )
    }

    fn request() -> Value {
        json!({"match_id": "m1", "sport_key": "soccer_epl", "team_a": "A", "team_b": "B"})
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_without_running() {
        let (pipeline, runs) = pipeline(false, Duration::ZERO);

        let state = pipeline.run_pipeline(json!({"match_id": "m1"})).await;

        assert_eq!(state.error_message(), Some("Missing required request fields: sport_key"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_is_served_from_cache() {
        let (pipeline, runs) = pipeline(false, Duration::ZERO);

        let first = pipeline.run_pipeline(request()).await;
        let second = pipeline.run_pipeline(request()).await;

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.run_id, second.run_id);
        assert_eq!(second.dossier(), Some(&json!({"match_title": "A vs B"})));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_run_is_not_cached() {
        let (pipeline, runs) = pipeline(true, Duration::ZERO);

        pipeline.run_pipeline(request()).await;
        let second = pipeline.run_pipeline(request()).await;

        assert!(!second.from_cache);
        assert!(second.is_error());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_partial_log() {
        let (pipeline, runs) = pipeline(false, Duration::from_secs(10));
        let pipeline = pipeline.with_deadline(Duration::from_secs(15));

        let state = pipeline.run_pipeline(request()).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(state.attempts().count(), 2);
        match &state.final_artifact {
            Some(FinalArtifact::Error { error, stage }) => {
                assert_eq!(stage, "stage_9_json_dossier");
                assert!(error.contains("timed out after 15000ms"));
            }
            other => panic!("expected timeout error, got {:?}", other),
        }

        let again = pipeline.run_pipeline(request()).await;
        assert!(!again.from_cache);
    }
}
