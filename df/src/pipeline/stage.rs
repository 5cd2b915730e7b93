//! Stage identifiers and plan construction

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// The collaborators that execute stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ChiefAnalyst,
    ResearchCoordinator,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::ChiefAnalyst => "chief_analyst",
            AgentKind::ResearchCoordinator => "research_coordinator",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Every stage a plan can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageId {
    #[serde(rename = "stage_2_initial_analysis")]
    InitialAnalysis,
    #[serde(rename = "stage_3_news_synthesis")]
    NewsSynthesis,
    #[serde(rename = "stage_4_question_generation")]
    QuestionGeneration,
    #[serde(rename = "stage_5_research_execution")]
    ResearchExecution,
    #[serde(rename = "stage_6_finding_integration")]
    FindingIntegration,
    #[serde(rename = "stage_7_narrative_synthesis")]
    NarrativeSynthesis,
    #[serde(rename = "stage_8_hidden_gems")]
    HiddenGems,
    #[serde(rename = "stage_8_5_alternative_perspectives")]
    AlternativePerspectives,
    #[serde(rename = "stage_9_json_dossier")]
    JsonDossier,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::InitialAnalysis,
        StageId::NewsSynthesis,
        StageId::QuestionGeneration,
        StageId::ResearchExecution,
        StageId::FindingIntegration,
        StageId::NarrativeSynthesis,
        StageId::HiddenGems,
        StageId::AlternativePerspectives,
        StageId::JsonDossier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::InitialAnalysis => "stage_2_initial_analysis",
            StageId::NewsSynthesis => "stage_3_news_synthesis",
            StageId::QuestionGeneration => "stage_4_question_generation",
            StageId::ResearchExecution => "stage_5_research_execution",
            StageId::FindingIntegration => "stage_6_finding_integration",
            StageId::NarrativeSynthesis => "stage_7_narrative_synthesis",
            StageId::HiddenGems => "stage_8_hidden_gems",
            StageId::AlternativePerspectives => "stage_8_5_alternative_perspectives",
            StageId::JsonDossier => "stage_9_json_dossier",
        }
    }

    /// The only agent allowed to execute this stage
    pub fn owner(&self) -> AgentKind {
        match self {
            StageId::QuestionGeneration | StageId::ResearchExecution | StageId::FindingIntegration => {
                AgentKind::ResearchCoordinator
            }
            _ => AgentKind::ChiefAnalyst,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which agent runs which stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub agent: AgentKind,
    pub stage: StageId,
}

impl StageDescriptor {
    /// Descriptor assigning a stage to its owning agent
    pub fn owned(stage: StageId) -> Self {
        Self {
            agent: stage.owner(),
            stage,
        }
    }
}

/// Errors rejected when a plan or executor is constructed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Plan has no stages")]
    Empty,

    #[error("Stage {stage} belongs to {expected}, not {found}")]
    WrongAgent {
        stage: StageId,
        expected: AgentKind,
        found: AgentKind,
    },

    #[error("No agent registered for {agent} (needed by {stage})")]
    MissingAgent { agent: AgentKind, stage: StageId },
}

/// An ordered, validated sequence of stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<StageDescriptor>,
}

impl Plan {
    pub fn new(steps: Vec<StageDescriptor>) -> Result<Self, PlanError> {
        debug!(steps = steps.len(), "Plan::new: called");
        if steps.is_empty() {
            return Err(PlanError::Empty);
        }
        for step in &steps {
            let expected = step.stage.owner();
            if step.agent != expected {
                return Err(PlanError::WrongAgent {
                    stage: step.stage,
                    expected,
                    found: step.agent,
                });
            }
        }
        Ok(Self { steps })
    }

    /// The nine-stage dossier plan
    pub fn standard() -> Self {
        Self {
            steps: StageId::ALL.into_iter().map(StageDescriptor::owned).collect(),
        }
    }

    pub fn steps(&self) -> &[StageDescriptor] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Distinct agents the plan needs, in first-use order
    pub fn agents(&self) -> Vec<AgentKind> {
        let mut agents = Vec::new();
        for step in &self.steps {
            if !agents.contains(&step.agent) {
                agents.push(step.agent);
            }
        }
        agents
    }
}
