//! dossierflow - staged content synthesis over unreliable LLM services
//!
//! A sequential stage plan drives agents that call external text-generation and
//! research services. Everything around those calls exists to keep one bad response
//! from sinking a run.
//!
//! # Modules
//!
//! - [`pipeline`] - stage plan, shared `PlanState`, executor and entry point
//! - [`agents`] - the analyst and research agents of the standard plan
//! - [`dispatch`] - bounded concurrent fan-out/fan-in
//! - [`resilient`] - classified retry with exponential backoff
//! - [`extract`] - structured output extraction with single-shot repair
//! - [`cache`] - keyed TTL cache
//! - [`llm`] - LLM client trait and provider adapters
//! - [`tools`] - tools available to stages
//! - [`prompts`] - prompt templates
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod agents;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod resilient;
pub mod tools;

pub use cache::{CacheStats, CacheStore, TtlCache};
pub use config::{Config, LlmConfig};
pub use dispatch::{DispatchError, DispatchResult, Dispatcher, dispatch};
pub use extract::{Extractor, Shape};
pub use llm::{CompletionRequest, CompletionResponse, ErrorClass, LlmClient, LlmError, create_client};
pub use pipeline::{
    Agent, AgentKind, AgentRegistry, FinalArtifact, Pipeline, PipelineInput, Plan, PlanError, PlanExecutor, PlanState,
    StageDescriptor, StageId, StepOutcome,
};
pub use prompts::{PromptContext, PromptLoader};
pub use resilient::{CallOutcome, ClassifiedError, ResilientClient, RetryPolicy};
pub use tools::{Tool, ToolError, ToolRegistry, ToolResult};
