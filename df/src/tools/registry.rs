//! ToolRegistry - the tools available to pipeline stages

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{Tool, ToolError, ToolResult};

/// Registry name of the mandatory baseline-data prerequisite
pub const BASELINE_TOOL: &str = "baseline_data";

/// Registry name of the research lookup tool
pub const RESEARCH_TOOL: &str = "research";

/// Named tools shared by every stage of a run
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        debug!("ToolRegistry::empty: called");
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool_name = %tool.name(), "ToolRegistry::register: called");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Execute a tool by name; an unknown name is an error result
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        debug!(tool_name = %name, "ToolRegistry::execute: called");
        match self.tools.get(name) {
            Some(tool) => tool.execute(params).await,
            None => {
                debug!(tool_name = %name, "ToolRegistry::execute: unknown tool");
                ToolResult::error(
                    ToolError::UnknownTool {
                        name: name.to_string(),
                    }
                    .to_string(),
                )
            }
        }
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo the params back"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, params: Value) -> ToolResult {
            ToolResult::success(params)
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let registry = ToolRegistry::empty().with(Arc::new(EchoTool));

        let result = registry.execute("echo", json!({"x": 1})).await;

        assert!(!result.is_error);
        assert_eq!(result.content, json!({"x": 1}));
        assert!(registry.has_tool("echo"));
        assert_eq!(registry.tool_names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let registry = ToolRegistry::empty();

        let result = registry.execute("odds", json!({})).await;

        assert!(result.is_error);
        assert_eq!(result.error_message(), Some("Tool not found: odds"));
        assert!(registry.get("odds").is_none());
    }
}
