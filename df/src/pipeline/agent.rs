//! Agent trait and registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::stage::{AgentKind, StageId};
use super::state::PlanState;
use crate::tools::ToolRegistry;

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// Nothing to do; the run continues
    Skipped { reason: String },
    /// Fatal to the run
    Failed(String),
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed(error.into())
    }
}

/// A collaborator that executes the stages it owns
///
/// Implementations convert internal failures into `StepOutcome::Failed`
/// rather than panicking; the executor still contains panics that slip through.
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn execute_step(&self, stage: StageId, state: &mut PlanState, tools: &ToolRegistry) -> StepOutcome;
}

/// Agents by kind
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent under its own kind, replacing any previous one
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        debug!(agent = %agent.kind(), "AgentRegistry::register: called");
        self.agents.insert(agent.kind(), agent);
    }

    pub fn with(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.agents.get(&kind).cloned()
    }

    pub fn contains(&self, kind: AgentKind) -> bool {
        self.agents.contains_key(&kind)
    }
}
