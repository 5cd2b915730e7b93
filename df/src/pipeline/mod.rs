//! Stage plan execution
//!
//! A `Plan` is an ordered list of stages, each owned by one agent kind. The
//! `PlanExecutor` walks it over a single `PlanState`, and `Pipeline` adds request
//! validation, a run deadline and the finished-dossier cache on top.

mod agent;
mod executor;
mod runner;
mod stage;
mod state;

pub use agent::{Agent, AgentRegistry, StepOutcome};
pub use executor::PlanExecutor;
pub use runner::Pipeline;
pub use stage::{AgentKind, Plan, PlanError, StageDescriptor, StageId};
pub use state::{
    DerivedContext, FinalArtifact, LogEntry, PREREQUISITE_STAGE, PipelineInput, PlanState, REQUEST_STAGE,
    ResearchFinding, ResearchQuestion, Severity,
};
