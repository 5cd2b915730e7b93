//! PlanExecutor - runs a plan's stages in order over one PlanState
//!
//! The baseline prerequisite runs first; any stage that fails or panics ends the run
//! with an error artifact naming that stage. Stages never overlap, so the state needs no lock.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::agent::{AgentRegistry, StepOutcome};
use super::stage::{Plan, PlanError};
use super::state::{PREREQUISITE_STAGE, PipelineInput, PlanState, Severity};
use crate::dispatch::panic_message;
use crate::tools::{BASELINE_TOOL, ToolRegistry};

pub struct PlanExecutor {
    plan: Plan,
    agents: AgentRegistry,
}

impl PlanExecutor {
    /// Fails if the plan names an agent the registry does not have
    pub fn new(plan: Plan, agents: AgentRegistry) -> Result<Self, PlanError> {
        debug!(stages = plan.len(), "PlanExecutor::new: called");
        for step in plan.steps() {
            if !agents.contains(step.agent) {
                return Err(PlanError::MissingAgent {
                    agent: step.agent,
                    stage: step.stage,
                });
            }
        }
        Ok(Self { plan, agents })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Run the whole plan for `input` and return the finished state
    pub async fn execute(&self, input: PipelineInput, tools: &ToolRegistry) -> PlanState {
        let mut state = PlanState::new(input);
        self.run(&mut state, tools).await;
        state
    }

    /// Run the plan over a caller-owned state
    ///
    /// Everything written before an interruption stays in `state`.
    pub async fn run(&self, state: &mut PlanState, tools: &ToolRegistry) {
        debug!(run_id = %state.run_id, "PlanExecutor::run: called");

        state.current_stage = None;
        state.log(Severity::Info, PREREQUISITE_STAGE, "Fetching baseline data");
        let baseline = tools.execute(BASELINE_TOOL, state.input.baseline_params()).await;
        if baseline.is_error {
            let reason = baseline.error_message().unwrap_or("unknown error").to_string();
            error!(run_id = %state.run_id, %reason, "PlanExecutor::run: baseline prerequisite failed");
            state.log(Severity::Error, PREREQUISITE_STAGE, reason.clone());
            state.fail(PREREQUISITE_STAGE, format!("Baseline data fetch failed: {}", reason));
            return;
        }
        state.context.baseline = Some(baseline.content);
        state.log(Severity::Info, PREREQUISITE_STAGE, "Baseline data ready");

        for step in self.plan.steps() {
            let stage = step.stage;
            state.current_stage = Some(stage);
            info!(run_id = %state.run_id, %stage, agent = %step.agent, "PlanExecutor::run: attempting stage");
            state.log(Severity::Info, stage.as_str(), format!("Attempting {} with {}", stage, step.agent));

            let Some(agent) = self.agents.get(step.agent) else {
                let message = format!("No agent registered for {}", step.agent);
                error!(%stage, %message, "PlanExecutor::run: missing agent");
                state.log(Severity::Error, stage.as_str(), message.clone());
                state.fail(stage.as_str(), format!("Stage {} failed: {}", stage, message));
                return;
            };

            let outcome = AssertUnwindSafe(agent.execute_step(stage, state, tools))
                .catch_unwind()
                .await;

            match outcome {
                Ok(StepOutcome::Completed) => {
                    debug!(%stage, "PlanExecutor::run: stage completed");
                    state.log(Severity::Info, stage.as_str(), "Completed");
                }
                Ok(StepOutcome::Skipped { reason }) => {
                    info!(%stage, %reason, "PlanExecutor::run: stage skipped");
                    state.log(Severity::Info, stage.as_str(), format!("Skipped: {}", reason));
                }
                Ok(StepOutcome::Failed(e)) => {
                    error!(run_id = %state.run_id, %stage, error = %e, "PlanExecutor::run: stage failed");
                    state.log(Severity::Error, stage.as_str(), e.clone());
                    state.fail(stage.as_str(), format!("Stage {} failed: {}", stage, e));
                    return;
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(run_id = %state.run_id, %stage, %message, "PlanExecutor::run: stage panicked");
                    state.log(Severity::Error, stage.as_str(), format!("panicked: {}", message));
                    state.fail(stage.as_str(), format!("Stage {} panicked: {}", stage, message));
                    return;
                }
            }
        }

        state.current_stage = None;
        if state.final_artifact.is_none() {
            warn!(run_id = %state.run_id, "PlanExecutor::run: plan finished without a final artifact");
        }
        info!(run_id = %state.run_id, stages = self.plan.len(), "PlanExecutor::run: plan completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::agent::Agent;
    use crate::pipeline::stage::{AgentKind, StageDescriptor, StageId};
    use crate::tools::{Tool, ToolResult};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    enum Behavior {
        Complete,
        Skip,
        Fail(&'static str),
        Panic,
    }

    struct ScriptedAgent {
        kind: AgentKind,
        behaviors: HashMap<StageId, Behavior>,
        ran: Arc<Mutex<Vec<StageId>>>,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn kind(&self) -> AgentKind {
            self.kind
        }

        async fn execute_step(&self, stage: StageId, state: &mut PlanState, _tools: &ToolRegistry) -> StepOutcome {
            self.ran.lock().unwrap().push(stage);
            match self.behaviors.get(&stage).cloned().unwrap_or(Behavior::Complete) {
                Behavior::Complete => {
                    state.context.analysis = Some(format!("after {}", stage));
                    StepOutcome::Completed
                }
                Behavior::Skip => StepOutcome::skipped("nothing to do"),
                Behavior::Fail(e) => StepOutcome::failed(e),
                Behavior::Panic => panic!("agent exploded"),
            }
        }
    }

    struct StubBaseline {
        fail: bool,
    }

    #[async_trait]
    impl Tool for StubBaseline {
        fn name(&self) -> &'static str {
            BASELINE_TOOL
        }

        fn description(&self) -> &'static str {
            "stub"
        }

        fn input_schema(&self) -> Value {
            json!({})
        }

        async fn execute(&self, params: Value) -> ToolResult {
            if self.fail {
                return ToolResult::error("odds service unreachable");
            }
            ToolResult::success(json!({"match_id": params["match_id"]}))
        }
    }

    fn setup(behaviors: &[(StageId, Behavior)]) -> (PlanExecutor, Arc<Mutex<Vec<StageId>>>) {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let behaviors: HashMap<StageId, Behavior> = behaviors.iter().cloned().collect();
        let agents = [AgentKind::ChiefAnalyst, AgentKind::ResearchCoordinator]
            .into_iter()
            .fold(AgentRegistry::new(), |registry, kind| {
                registry.with(Arc::new(ScriptedAgent {
                    kind,
                    behaviors: behaviors.clone(),
                    ran: ran.clone(),
                }))
            });
        let plan = Plan::new(StageId::ALL[..5].iter().copied().map(StageDescriptor::owned).collect()).unwrap();
        (PlanExecutor::new(plan, agents).unwrap(), ran)
    }

    fn tools(fail: bool) -> ToolRegistry {
        ToolRegistry::empty().with(Arc::new(StubBaseline { fail }))
    }

    fn input() -> PipelineInput {
        PipelineInput::from_request(&json!({"match_id": "m1", "sport_key": "soccer_epl"}))
    }

    #[tokio::test]
    async fn test_all_stages_complete() {
        let (executor, ran) = setup(&[]);

        let state = executor.execute(input(), &tools(false)).await;

        assert!(!state.is_error());
        assert_eq!(ran.lock().unwrap().len(), 5);
        assert_eq!(state.attempts().count(), 5);
        assert_eq!(state.context.baseline, Some(json!({"match_id": "m1"})));
        assert_eq!(state.context.analysis.as_deref(), Some("after stage_6_finding_integration"));
        assert_eq!(state.current_stage, None);
    }

    #[tokio::test]
    async fn test_failed_stage_halts_run() {
        let (executor, ran) = setup(&[(StageId::QuestionGeneration, Behavior::Fail("x"))]);

        let state = executor.execute(input(), &tools(false)).await;

        assert_eq!(state.attempts().count(), 3);
        assert_eq!(ran.lock().unwrap().len(), 3);
        let error = state.error_message().unwrap();
        assert!(error.contains("stage_4_question_generation"));
        assert!(error.contains('x'));
        let last = state.execution_log.last().unwrap();
        assert_eq!(last.severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_panicking_stage_is_contained() {
        let (executor, ran) = setup(&[(StageId::NewsSynthesis, Behavior::Panic)]);

        let state = executor.execute(input(), &tools(false)).await;

        assert_eq!(ran.lock().unwrap().as_slice(), &[StageId::InitialAnalysis, StageId::NewsSynthesis]);
        let error = state.error_message().unwrap();
        assert!(error.contains("stage_3_news_synthesis"));
        assert!(error.contains("agent exploded"));
    }

    #[tokio::test]
    async fn test_skipped_stage_continues() {
        let (executor, ran) = setup(&[(StageId::ResearchExecution, Behavior::Skip)]);

        let state = executor.execute(input(), &tools(false)).await;

        assert!(!state.is_error());
        assert_eq!(ran.lock().unwrap().len(), 5);
        assert!(state.execution_log.iter().any(|e| e.message == "Skipped: nothing to do"));
    }

    #[tokio::test]
    async fn test_baseline_failure_runs_no_stages() {
        let (executor, ran) = setup(&[]);

        let state = executor.execute(input(), &tools(true)).await;

        assert!(ran.lock().unwrap().is_empty());
        assert_eq!(state.attempts().count(), 0);
        match &state.final_artifact {
            Some(crate::pipeline::FinalArtifact::Error { error, stage }) => {
                assert_eq!(stage, PREREQUISITE_STAGE);
                assert!(error.contains("odds service unreachable"));
            }
            other => panic!("expected error artifact, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_baseline_tool_fails_fast() {
        let (executor, ran) = setup(&[]);

        let state = executor.execute(input(), &ToolRegistry::empty()).await;

        assert!(ran.lock().unwrap().is_empty());
        assert!(state.error_message().unwrap().contains("Tool not found: baseline_data"));
    }

    #[test]
    fn test_missing_agent_rejected_at_construction() {
        let agents = AgentRegistry::new().with(Arc::new(ScriptedAgent {
            kind: AgentKind::ChiefAnalyst,
            behaviors: HashMap::new(),
            ran: Arc::new(Mutex::new(Vec::new())),
        }));

        let err = PlanExecutor::new(Plan::standard(), agents).err().unwrap();

        assert_eq!(
            err,
            PlanError::MissingAgent {
                agent: AgentKind::ResearchCoordinator,
                stage: StageId::QuestionGeneration,
            }
        );
    }
}
