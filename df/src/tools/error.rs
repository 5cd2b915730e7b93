//! Tool error types

use thiserror::Error;

/// Errors that can occur during tool execution
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Missing or invalid required parameters: {}", .0.join(", "))]
    MissingParameters(Vec<&'static str>),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tool not found: {name}")]
    UnknownTool { name: String },

    #[error("Upstream lookup failed: {0}")]
    Upstream(String),
}
