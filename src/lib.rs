//! Fusion Orchestrator
//!
//! Keyword-routed agent orchestration with pattern fallback and promotion.
//!
//! # Features
//!
//! - **Dispatcher**: keyword heuristics pick a prompt type, scorecard ranks agents
//! - **Pattern Registry**: trigger keywords, target agent, threshold, fallback chain
//! - **Orchestrator**: single runs, pipelines, low-confidence pattern fallback
//! - **Context Store**: bounded interaction log, shared state, pattern statistics
//! - **Promoter**: high-scoring history becomes literal-template patterns
//!
//! # Architecture
//!
//! ```text
//! prompt ──► Dispatcher ──► Orchestrator ──► Agent(s) ──► ContextStore
//!                │               │                            │
//!                └── Registry ◄──┴──── Promoter ◄─────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod memory;
pub mod patterns;
pub mod router;

pub use agent::{
    Agent, AgentContext, AgentResult, ExecutionOrchestrator, ExecutionState, OrchestratorConfig,
    PipelineResult, RoutedExecution, StageResult, Tool, ToolResult,
};
pub use config::Config;
pub use error::{FusionError, Result};
pub use memory::{ContextConfig, ContextStore, JsonFileBackend, MemoryBackend, MemoryEntry, SharedState};
pub use patterns::{Pattern, PatternPromoter, PatternRegistry, PatternType, SharedRegistry};
pub use router::{Dispatcher, DispatcherConfig, RoutingDecision};
