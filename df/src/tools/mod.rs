//! Tool system for pipeline stages
//!
//! Tools are the collaborators a stage calls by name through the `ToolRegistry`.
//! Every tool answers with a `ToolResult`; failures are error results, never panics.

mod baseline;
mod error;
mod registry;
mod research;
mod traits;

pub use baseline::{BaselineDataTool, BaselineRequest, BaselineSource, ResearchBaselineSource, sport_display};
pub use error::ToolError;
pub use registry::{BASELINE_TOOL, RESEARCH_TOOL, ToolRegistry};
pub use research::ResearchTool;
pub use traits::{Tool, ToolResult};
