//! Error taxonomy
//!
//! Failures in the mandatory path (the requested agent, an exhausted fallback
//! chain) surface as `FusionError`. Failures in optional components (tools,
//! individual fallback patterns, scorecard reads, persistence) are logged and
//! degraded around; the variants exist so they can be logged uniformly.

use thiserror::Error;

/// Crate result type
pub type Result<T> = std::result::Result<T, FusionError>;

/// Orchestration errors
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Agent not registered: {0}")]
    AgentNotRegistered(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Agent '{agent}' failed: {message}")]
    AgentExecution { agent: String, message: String },

    #[error("Agent '{agent}' returned invalid output: {reason}")]
    InvalidAgentOutput { agent: String, reason: String },

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Fallback cycle detected: {}", .0.join(" -> "))]
    FallbackCycle(Vec<String>),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Agent '{0}' timed out")]
    Timeout(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FusionError {
    /// Name of the agent this error is attributed to, if any
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::AgentNotRegistered(name) | Self::Timeout(name) => Some(name),
            Self::AgentExecution { agent, .. } | Self::InvalidAgentOutput { agent, .. } => Some(agent),
            _ => None,
        }
    }

    /// Whether the caller asked for this failure (cancellation is never recovered from)
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
