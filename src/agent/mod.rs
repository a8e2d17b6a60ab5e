//! Agent Capability Interface
//!
//! Every agent is a named component that takes a prompt plus a read-only view of
//! the session (resolved tools, shared state) and asynchronously produces an
//! [`AgentResult`]. The orchestrator only ever talks to agents through this
//! contract:
//!
//! - `output` is the text handed to the next pipeline stage
//! - `confidence` is the self-reported routing signal (defaulted when absent)
//! - `shared_state` entries are merged into the session blackboard
//! - a populated `error` field marks the result as a failure

pub mod builtin;
pub mod orchestrator;
pub mod tools;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::SharedState;

pub use orchestrator::{
    ExecutionOrchestrator, ExecutionState, OrchestratorConfig, OrchestratorStats, PipelineResult,
    RoutedExecution, StageResult,
};
pub use tools::{Tool, ToolRegistry, ToolResult, ToolSet};

/// Result record returned by an agent run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    /// Primary textual output
    #[serde(default)]
    pub output: String,
    /// Self-reported confidence (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Rewritten output, used as pipeline input when `output` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_output: Option<String>,
    /// Side-channel signals for later agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    /// Presence indicates failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by output-transformation patterns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Set by output-transformation patterns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_output: Option<String>,
    /// Anything else the agent reports (scores, metrics)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentResult {
    /// Create a result with the given output
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_enhanced_output(mut self, enhanced: impl Into<String>) -> Self {
        self.enhanced_output = Some(enhanced.into());
        self
    }

    /// Add a shared-state entry
    pub fn with_shared_state(mut self, key: &str, value: Value) -> Self {
        self.shared_state
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn with_tools_used(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    /// Add an extra field
    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Confidence, or `default` when the agent didn't report one
    pub fn confidence_or(&self, default: f64) -> f64 {
        self.confidence.unwrap_or(default)
    }

    /// Text handed to the next pipeline stage
    pub fn next_input(&self) -> Option<&str> {
        if !self.output.is_empty() {
            Some(&self.output)
        } else {
            self.enhanced_output.as_deref().filter(|s| !s.is_empty())
        }
    }

    /// Overall quality score (`overall_score` extra), falling back to confidence
    pub fn quality_score(&self) -> Option<f64> {
        self.extra
            .get("overall_score")
            .and_then(Value::as_f64)
            .or(self.confidence)
    }

    /// Boundary validation before anything is merged into the session
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        if let Some(confidence) = self.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(format!("confidence {} outside [0, 1]", confidence));
            }
        }

        if let Some(state) = &self.shared_state {
            if state.keys().any(|k| k.trim().is_empty()) {
                return Err("shared_state contains an empty key".to_string());
            }
        }

        Ok(())
    }
}

/// Read-only view of the session handed to an agent
#[derive(Clone, Copy)]
pub struct AgentContext<'a> {
    /// Tools resolved for this invocation
    pub tools: &'a ToolSet,
    /// Session blackboard as of the start of this invocation
    pub shared_state: &'a SharedState,
}

/// Uniform agent contract
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Short human-readable purpose
    fn description(&self) -> &str {
        ""
    }

    /// Run the agent against a prompt
    async fn run(&self, prompt: &str, ctx: AgentContext<'_>) -> anyhow::Result<AgentResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_next_input_prefers_output() {
        let result = AgentResult::new("primary").with_enhanced_output("enhanced");
        assert_eq!(result.next_input(), Some("primary"));

        let result = AgentResult::new("").with_enhanced_output("enhanced");
        assert_eq!(result.next_input(), Some("enhanced"));

        assert_eq!(AgentResult::new("").next_input(), None);
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        assert!(AgentResult::new("x").with_confidence(0.5).validate().is_ok());
        assert!(AgentResult::new("x").with_confidence(1.5).validate().is_err());
        assert!(AgentResult::new("x").with_confidence(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_error_field() {
        let mut result = AgentResult::new("x");
        result.error = Some("upstream failed".into());
        assert_eq!(result.validate(), Err("upstream failed".to_string()));
    }

    #[test]
    fn test_serde_flattens_extra() {
        let result = AgentResult::new("report")
            .with_confidence(0.9)
            .with_extra("overall_score", json!(0.97));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["overall_score"], json!(0.97));
        assert!(value.get("error").is_none());

        let back: AgentResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.quality_score(), Some(0.97));
    }
}
