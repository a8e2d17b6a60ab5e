//! Tool Registry
//!
//! Tools are optional helpers an agent may call during its run. Unknown tool
//! names are dropped with a warning when a tool set is resolved; a missing tool
//! never aborts an agent invocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::FusionError;

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool name that was called
    pub tool_name: String,
    /// Whether execution succeeded
    pub success: bool,
    /// Result content (success or error message)
    pub content: String,
    /// Tool's confidence in its own analysis
    pub confidence: f64,
    /// Structured result data
    pub data: Option<Value>,
    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(tool_name: &str, content: String, confidence: f64) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: true,
            content,
            confidence,
            data: None,
            duration_ms: 0,
        }
    }

    /// Create an error result
    pub fn error(tool_name: &str, error: String) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: false,
            content: error,
            confidence: 0.0,
            data: None,
            duration_ms: 0,
        }
    }

    /// Attach structured data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Uniform tool contract
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn run(&self, input: &str) -> anyhow::Result<ToolResult>;
}

/// Tools resolved for a single agent invocation, in request order
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<(String, Arc<dyn Tool>)>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Run a tool by name; failures come back as an error result
    pub async fn run(&self, name: &str, input: &str) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(name, FusionError::ToolNotFound(name.to_string()).to_string());
        };

        let start = Instant::now();
        let mut result = match tool.run(input).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(name, e.to_string()),
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Run every tool in the set, in order
    pub async fn run_all(&self, input: &str) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(self.tools.len());
        for (name, _) in &self.tools {
            results.push(self.run(name, input).await);
        }
        results
    }

    fn push(&mut self, name: &str, tool: Arc<dyn Tool>) {
        if self.get(name).is_none() {
            self.tools.push((name.to_string(), tool));
        }
    }
}

/// Tool registry for managing available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.register_as(tool.name().to_string(), tool);
    }

    /// Register a tool under an explicit name
    pub fn register_as(&mut self, name: String, tool: Arc<dyn Tool>) {
        info!("Registered tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// List all tool names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Resolve requested names into a tool set, dropping unknown names
    pub fn resolve(&self, names: &[String]) -> ToolSet {
        let mut set = ToolSet::new();
        for name in names {
            match self.tools.get(name) {
                Some(tool) => set.push(name, Arc::clone(tool)),
                None => warn!(error = %FusionError::ToolNotFound(name.clone()), "Dropping unknown tool"),
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn run(&self, input: &str) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success("echo", input.to_string(), 0.9))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn run(&self, _input: &str) -> anyhow::Result<ToolResult> {
            anyhow::bail!("tool crashed")
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Broken));
        registry
    }

    #[test]
    fn test_resolve_drops_unknown() {
        let set = registry().resolve(&["echo".into(), "missing".into(), "echo".into()]);
        assert_eq!(set.names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_run_converts_failures() {
        let set = registry().resolve(&["echo".into(), "broken".into()]);

        let ok = set.run("echo", "hello").await;
        assert!(ok.success);
        assert_eq!(ok.content, "hello");

        let failed = set.run("broken", "hello").await;
        assert!(!failed.success);
        assert!(failed.content.contains("crashed"));

        let missing = set.run("nope", "hello").await;
        assert!(!missing.success);
    }

    #[test]
    fn test_list_sorted() {
        assert_eq!(registry().list(), vec!["broken", "echo"]);
    }
}
