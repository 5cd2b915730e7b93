//! Tool trait definition

use async_trait::async_trait;
use serde_json::{Value, json};

/// A collaborator a stage can call by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool; failures come back as an error result, never a panic
    async fn execute(&self, params: Value) -> ToolResult;
}

/// Result of a tool execution
///
/// An error result carries `{"error": message}` as its content.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: impl Into<Value>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// The error message, if this is an error result
    pub fn error_message(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.content.get("error").and_then(Value::as_str)
    }

    /// Text content of a successful result
    pub fn as_text(&self) -> Option<&str> {
        if self.is_error { None } else { self.content.as_str() }
    }

    pub fn into_result(self) -> Result<Value, String> {
        if self.is_error {
            Err(self.error_message().unwrap_or("unknown tool error").to_string())
        } else {
            Ok(self.content)
        }
    }
}
