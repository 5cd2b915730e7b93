//! Integration tests for the dossier pipeline
//!
//! These run whole plans against scripted agents, tools and LLM backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use dossierflow::agents::{ChiefAnalyst, ResearchCoordinator};
use dossierflow::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use dossierflow::pipeline::{
    Agent, AgentKind, AgentRegistry, FinalArtifact, Pipeline, PipelineInput, Plan, PlanExecutor, PlanState,
    StageDescriptor, StageId, StepOutcome,
};
use dossierflow::prompts::PromptLoader;
use dossierflow::resilient::{ResilientClient, RetryPolicy};
use dossierflow::tools::{
    BASELINE_TOOL, BaselineDataTool, ResearchBaselineSource, ResearchTool, Tool, ToolRegistry, ToolResult,
};
use dossierflow::{Extractor, TtlCache};

// =============================================================================
// Scripted collaborators
// =============================================================================

/// Agent that records the stages it runs and fails the ones it is told to
struct RecordingAgent {
    kind: AgentKind,
    fail_on: Option<StageId>,
    ran: Arc<Mutex<Vec<StageId>>>,
}

#[async_trait]
impl Agent for RecordingAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn execute_step(&self, stage: StageId, _state: &mut PlanState, _tools: &ToolRegistry) -> StepOutcome {
        self.ran.lock().unwrap().push(stage);
        if self.fail_on == Some(stage) {
            return StepOutcome::failed("x");
        }
        StepOutcome::Completed
    }
}

struct StaticBaseline;

#[async_trait]
impl Tool for StaticBaseline {
    fn name(&self) -> &'static str {
        BASELINE_TOOL
    }

    fn description(&self) -> &'static str {
        "static baseline"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _params: Value) -> ToolResult {
        ToolResult::success(json!({"match_title": "A vs B"}))
    }
}

/// LLM backend answering by what the prompt asks for
struct ScriptedLlm {
    research_down: bool,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(research_down: bool) -> Arc<Self> {
        Arc::new(Self {
            research_down,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.last_user_text().unwrap_or_default().to_string();

        if request.system_prompt.contains("research assistant") {
            if self.research_down {
                return Err(LlmError::ApiError {
                    status: 403,
                    message: "research quota exhausted".to_string(),
                });
            }
            return Ok(CompletionResponse::text(format!("Finding for: {}", prompt)));
        }

        let reply = if prompt.contains("Baseline data for") {
            "Arsenal are in form; Chelsea travel well.".to_string()
        } else if prompt.contains("Fold the news") {
            "Arsenal are in form; Saka is doubtful.".to_string()
        } else if prompt.contains("open questions") {
            r#"```json
[
  {"question": "Will Saka start?", "perplexity_query_to_run": "Saka fitness update"},
  "Chelsea recent away results"
]
```"#
                .to_string()
        } else if prompt.contains("Integrate this finding") {
            "Integrated analysis".to_string()
        } else if prompt.contains("narrative of a match dossier") {
            r#"Sure! {"executive_summary_narrative": "Arsenal edge it", "verdict": "Home win"} Hope this helps."#
                .to_string()
        } else if prompt.contains("non-obvious insights") {
            r#"[{"title": "Corners", "insight": "Chelsea concede from set pieces", "confidence": "medium"}]"#.to_string()
        } else if prompt.contains("Argue against it") {
            r#"[{"perspective": "Away upset", "argument": "Chelsea counter well", "what_would_make_it_true": "Early goal"}]"#
                .to_string()
        } else if prompt.contains("Populate this exact JSON schema") {
            r#"{"match_title": "Arsenal vs. Chelsea", "executive_summary": "Arsenal edge it", "final_verdict": "Home win"}"#
                .to_string()
        } else {
            return Err(LlmError::InvalidResponse(format!("unexpected prompt: {}", prompt)));
        };
        Ok(CompletionResponse::text(reply))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn recording_executor(plan: Plan, fail_on: Option<StageId>) -> (PlanExecutor, Arc<Mutex<Vec<StageId>>>) {
    let ran = Arc::new(Mutex::new(Vec::new()));
    let agents = AgentRegistry::new()
        .with(Arc::new(RecordingAgent {
            kind: AgentKind::ChiefAnalyst,
            fail_on,
            ran: ran.clone(),
        }))
        .with(Arc::new(RecordingAgent {
            kind: AgentKind::ResearchCoordinator,
            fail_on,
            ran: ran.clone(),
        }));
    (PlanExecutor::new(plan, agents).expect("valid executor"), ran)
}

fn standard_pipeline(llm: Arc<ScriptedLlm>) -> Pipeline {
    let prompts = Arc::new(PromptLoader::embedded_only());
    let client = ResilientClient::new(llm, RetryPolicy::no_retry());

    let research = Arc::new(ResearchTool::new(
        client.clone(),
        prompts.load_template("research-system").expect("embedded prompt"),
        Arc::new(TtlCache::new("research", 32)),
        Duration::from_secs(3600),
    ));
    let baseline = Arc::new(BaselineDataTool::new(
        Arc::new(ResearchBaselineSource::new(research.clone(), prompts.clone(), 2)),
        Arc::new(TtlCache::new("baseline", 8)),
        Duration::from_secs(3600),
    ));
    let tools = ToolRegistry::empty().with(research).with(baseline);

    let agents = AgentRegistry::new()
        .with(Arc::new(
            ChiefAnalyst::new(client.clone(), Extractor::local(), prompts.clone()).expect("analyst"),
        ))
        .with(Arc::new(
            ResearchCoordinator::new(client, Extractor::local(), prompts, 2).expect("coordinator"),
        ));
    let executor = PlanExecutor::new(Plan::standard(), agents).expect("standard plan");

    Pipeline::new(executor, tools, TtlCache::new("dossier", 8), Duration::from_secs(86400))
}

fn request() -> Value {
    json!({
        "match_id": "epl-2025-ars-che",
        "sport_key": "soccer_epl",
        "team_a": "Arsenal",
        "team_b": "Chelsea",
        "match_date": "2025-05-04"
    })
}

// =============================================================================
// Executor Tests
// =============================================================================

#[tokio::test]
async fn test_five_stage_plan_halts_at_failing_stage() {
    let plan = Plan::new(StageId::ALL[..5].iter().copied().map(StageDescriptor::owned).collect()).unwrap();
    let (executor, ran) = recording_executor(plan, Some(StageId::QuestionGeneration));
    let tools = ToolRegistry::empty().with(Arc::new(StaticBaseline));

    let input = PipelineInput::from_request(&request());
    let state = executor.execute(input, &tools).await;

    assert_eq!(state.attempts().count(), 3, "stages 1-3 are attempted");
    assert_eq!(
        ran.lock().unwrap().as_slice(),
        &[StageId::InitialAnalysis, StageId::NewsSynthesis, StageId::QuestionGeneration]
    );
    match &state.final_artifact {
        Some(FinalArtifact::Error { error, stage }) => {
            assert_eq!(stage, "stage_4_question_generation");
            assert!(error.contains("stage_4_question_generation"));
            assert!(error.contains('x'));
        }
        other => panic!("expected an error artifact, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_artifact_serializes_with_stage() {
    let plan = Plan::new(vec![StageDescriptor::owned(StageId::InitialAnalysis)]).unwrap();
    let (executor, _) = recording_executor(plan, Some(StageId::InitialAnalysis));
    let tools = ToolRegistry::empty().with(Arc::new(StaticBaseline));

    let state = executor.execute(PipelineInput::from_request(&request()), &tools).await;
    let json = serde_json::to_value(&state).unwrap();

    assert_eq!(json["final_artifact"]["stage"], "stage_2_initial_analysis");
    assert!(json["execution_log"].as_array().unwrap().len() >= 2);
}

// =============================================================================
// End-to-end Tests
// =============================================================================

#[tokio::test]
async fn test_standard_plan_builds_dossier() {
    let llm = ScriptedLlm::new(false);
    let pipeline = standard_pipeline(llm.clone());

    let state = pipeline.run_pipeline(request()).await;

    assert!(!state.is_error(), "unexpected error: {:?}", state.error_message());
    assert_eq!(state.attempts().count(), 9);

    let baseline = state.context.baseline.as_ref().unwrap();
    assert_eq!(baseline["match_title"], "Arsenal vs. Chelsea (Premier League (EPL) - 2025-05-04)");
    assert_eq!(baseline["odds_data_summary"], "N/A");

    assert_eq!(state.context.research_questions.len(), 2);
    assert_eq!(state.context.findings.len(), 2);
    assert_eq!(state.context.findings[0].query_used, "Saka fitness update");
    assert_eq!(state.context.findings[0].finding_text, "Finding for: Saka fitness update");
    assert_eq!(state.context.analysis.as_deref(), Some("Integrated analysis"));
    assert_eq!(state.context.narrative.as_ref().unwrap()["verdict"], "Home win");
    assert_eq!(state.context.hidden_gems.len(), 1);
    assert_eq!(state.context.alternative_perspectives.len(), 1);

    let dossier = state.dossier().unwrap();
    assert_eq!(dossier["final_verdict"], "Home win");
    assert_eq!(dossier["provenance"]["run_id"], state.run_id.as_str());
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let llm = ScriptedLlm::new(false);
    let pipeline = standard_pipeline(llm.clone());

    let first = pipeline.run_pipeline(request()).await;
    let calls_after_first = llm.calls.load(Ordering::SeqCst);
    let second = pipeline.run_pipeline(request()).await;

    assert!(second.from_cache);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(llm.calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn test_research_outage_fails_at_baseline() {
    let llm = ScriptedLlm::new(true);
    let pipeline = standard_pipeline(llm);

    let state = pipeline.run_pipeline(request()).await;

    assert_eq!(state.attempts().count(), 0);
    match &state.final_artifact {
        Some(FinalArtifact::Error { error, stage }) => {
            assert_eq!(stage, "stage_1_baseline_data");
            assert!(error.contains("research quota exhausted"));
        }
        other => panic!("expected baseline error, got {:?}", other),
    }

    let again = pipeline.run_pipeline(request()).await;
    assert!(!again.from_cache, "failed runs are never cached");
}

#[tokio::test]
async fn test_request_without_sport_key_is_rejected() {
    let pipeline = standard_pipeline(ScriptedLlm::new(false));

    let state = pipeline.run_pipeline(json!({"match_id": "m1"})).await;

    assert!(state.error_message().unwrap().contains("sport_key"));
    assert!(state.context.baseline.is_none());
}
