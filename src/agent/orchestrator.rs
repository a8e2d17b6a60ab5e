//! Execution Orchestrator
//!
//! Sequencing engine over registered agents:
//! - `execute_agent`: one invocation with timing, error capture and memory logging
//! - `execute_pipeline`: ordered stages, each stage's output feeding the next
//! - `execute_with_pattern_fallback`: low-confidence retry through fallback patterns
//! - `route_and_execute`: dispatcher decision + best pattern + fallback execution
//!
//! Agent errors propagate out of `execute_agent`; the pipeline converts them into a
//! failed `PipelineResult`. Every invocation observes the session's cancellation
//! token and the optional per-agent timeout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::tools::{Tool, ToolRegistry, ToolSet};
use super::{Agent, AgentContext, AgentResult};
use crate::error::{FusionError, Result};
use crate::memory::{ContextStore, ExecutionStats, MemoryEntry};
use crate::patterns::registry::MAX_FALLBACK_DEPTH;
use crate::patterns::{OutputFormat, Pattern, PatternType, SharedRegistry};
use crate::router::{Dispatcher, RoutingDecision};

/// Per-request / per-stage execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Configuration for orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Primary results at or above this confidence skip the fallback patterns
    pub fallback_confidence: f64,
    /// Confidence assumed when an agent reports none
    pub default_confidence: f64,
    /// Target agent for patterns that name none
    pub default_pattern_agent: String,
    /// Transitive fallback depth used by `route_and_execute`
    pub max_fallback_depth: usize,
    /// Per-invocation time limit
    pub agent_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fallback_confidence: 0.8,
            default_confidence: 0.8,
            default_pattern_agent: "vp_design".to_string(),
            max_fallback_depth: MAX_FALLBACK_DEPTH,
            agent_timeout: None,
        }
    }
}

/// One pipeline stage
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub agent: String,
    pub state: ExecutionState,
    pub result: Option<AgentResult>,
    pub error: Option<String>,
    pub execution_time: Duration,
}

impl StageResult {
    fn pending(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            state: ExecutionState::Pending,
            result: None,
            error: None,
            execution_time: Duration::ZERO,
        }
    }
}

/// Pipeline outcome; failures are reported here rather than raised
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub status: ExecutionState,
    pub agent_sequence: Vec<String>,
    pub stages: Vec<StageResult>,
    /// Last successfully produced input (the original prompt if no stage produced one)
    pub final_output: String,
    pub total_execution_time: Duration,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionState::Succeeded
    }

    /// Results of stages that completed, in order
    pub fn completed(&self) -> Vec<&AgentResult> {
        self.stages.iter().filter_map(|s| s.result.as_ref()).collect()
    }
}

/// Outcome of `route_and_execute`
#[derive(Debug, Clone)]
pub struct RoutedExecution {
    pub decision: RoutingDecision,
    pub agent: String,
    pub pattern: String,
    pub fallback_patterns: Vec<String>,
    pub result: AgentResult,
}

/// Orchestrator statistics
#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    pub agents: Vec<String>,
    pub tools: Vec<String>,
    pub patterns: usize,
    pub executions: ExecutionStats,
}

/// Agent execution orchestrator
pub struct ExecutionOrchestrator {
    config: OrchestratorConfig,
    agents: HashMap<String, Arc<dyn Agent>>,
    /// Registration order (default pipeline)
    order: Vec<String>,
    tools: ToolRegistry,
    patterns: SharedRegistry,
    dispatcher: Arc<Dispatcher>,
}

impl ExecutionOrchestrator {
    pub fn new(config: OrchestratorConfig, patterns: SharedRegistry) -> Self {
        Self {
            config,
            agents: HashMap::new(),
            order: Vec::new(),
            tools: ToolRegistry::new(),
            patterns,
            dispatcher: Arc::new(Dispatcher::default()),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn patterns(&self) -> SharedRegistry {
        Arc::clone(&self.patterns)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register an agent under its own name; re-registering replaces in place
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), agent).is_some() {
            warn!("Agent {} already registered, replacing", name);
        } else {
            self.order.push(name.clone());
        }
        info!("Registered agent: {}", name);
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.register(tool);
    }

    pub fn register_pattern(&self, name: &str, pattern: Pattern) {
        self.patterns.write().register(name, pattern);
    }

    /// Agent names in registration order
    pub fn agent_names(&self) -> &[String] {
        &self.order
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn stats(&self, ctx: &ContextStore) -> OrchestratorStats {
        OrchestratorStats {
            agents: self.order.clone(),
            tools: self.tools.list().into_iter().map(str::to_string).collect(),
            patterns: self.patterns.read().len(),
            executions: ctx.execution_stats(),
        }
    }

    /// Run one agent and log the outcome; agent errors are returned, not swallowed
    pub async fn execute_agent(
        &self,
        name: &str,
        prompt: &str,
        tool_names: &[String],
        ctx: &mut ContextStore,
    ) -> Result<AgentResult> {
        let tools = self.tools.resolve(tool_names);

        let start = Instant::now();
        let outcome = self.invoke(name, prompt, &tools, ctx).await;
        let elapsed = start.elapsed();

        self.record(ctx, name, prompt, &outcome, &tools, elapsed, None);

        match &outcome {
            Ok(result) => info!(
                "Agent {} completed in {:.2}s (confidence {:.2})",
                name,
                elapsed.as_secs_f64(),
                result.confidence_or(self.config.default_confidence)
            ),
            Err(e) => warn!("Agent {} failed after {:.2}s: {}", name, elapsed.as_secs_f64(), e),
        }

        outcome
    }

    /// Run agents in order, threading each output into the next stage.
    /// `None` runs every registered agent in registration order.
    pub async fn execute_pipeline(
        &self,
        prompt: &str,
        agent_sequence: Option<&[String]>,
        tools_per_agent: &HashMap<String, Vec<String>>,
        ctx: &mut ContextStore,
    ) -> PipelineResult {
        let sequence: Vec<String> = agent_sequence.map_or_else(|| self.order.clone(), <[String]>::to_vec);
        let started_at = Utc::now();
        let start = Instant::now();

        let mut stages: Vec<StageResult> = sequence.iter().map(|a| StageResult::pending(a)).collect();
        let mut current = prompt.to_string();
        let mut failure: Option<String> = None;

        info!("Starting pipeline: {}", sequence.join(" -> "));

        for stage in stages.iter_mut() {
            if ctx.is_cancelled() {
                failure = Some(FusionError::Cancelled.to_string());
                break;
            }

            stage.state = ExecutionState::Running;
            let tools = tools_per_agent.get(&stage.agent).cloned().unwrap_or_default();
            let stage_start = Instant::now();
            let outcome = self.execute_agent(&stage.agent, &current, &tools, ctx).await;
            stage.execution_time = stage_start.elapsed();

            match outcome {
                Ok(result) => {
                    if let Some(next) = result.next_input() {
                        current = next.to_string();
                    }
                    stage.state = ExecutionState::Succeeded;
                    stage.result = Some(result);
                }
                Err(e) => {
                    stage.state = ExecutionState::Failed;
                    stage.error = Some(e.to_string());
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        let status = if failure.is_some() {
            ExecutionState::Failed
        } else {
            ExecutionState::Succeeded
        };

        let result = PipelineResult {
            status,
            agent_sequence: sequence,
            stages,
            final_output: current,
            total_execution_time: start.elapsed(),
            error: failure,
            started_at,
            finished_at: Utc::now(),
        };

        match &result.error {
            None => info!(
                "Pipeline completed in {:.2}s ({} stages)",
                result.total_execution_time.as_secs_f64(),
                result.stages.len()
            ),
            Some(e) => warn!("Pipeline failed: {}", e),
        }

        result
    }

    /// Run the primary agent, retrying through fallback patterns when it scores
    /// below the fallback bar or fails outright
    pub async fn execute_with_pattern_fallback(
        &self,
        prompt: &str,
        primary_agent: &str,
        fallback_patterns: &[String],
        ctx: &mut ContextStore,
    ) -> Result<AgentResult> {
        match self.execute_agent(primary_agent, prompt, &[], ctx).await {
            Ok(primary) => {
                let baseline = primary.confidence_or(self.config.default_confidence);
                if baseline >= self.config.fallback_confidence {
                    return Ok(primary);
                }

                info!(
                    "Confidence {:.2} below {:.2}, trying fallback patterns",
                    baseline, self.config.fallback_confidence
                );

                for name in fallback_patterns {
                    match self.apply_pattern(name, prompt, ctx).await {
                        Ok(candidate) => {
                            let confidence = candidate.confidence_or(self.config.default_confidence);
                            let improved = confidence > baseline;
                            self.patterns.write().record_usage(name, confidence, improved);
                            if improved {
                                info!("Fallback pattern {} improved confidence to {:.2}", name, confidence);
                                return Ok(candidate);
                            }
                        }
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => self.note_pattern_failure(name, &e),
                    }
                }

                Ok(primary)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!("Primary agent {} failed, attempting recovery: {}", primary_agent, e);

                for name in fallback_patterns {
                    match self.apply_pattern(name, prompt, ctx).await {
                        Ok(candidate) => {
                            let confidence = candidate.confidence_or(self.config.default_confidence);
                            self.patterns.write().record_usage(name, confidence, true);
                            info!("Recovered {} through pattern {}", primary_agent, name);
                            return Ok(candidate);
                        }
                        Err(err) if err.is_cancelled() => return Err(err),
                        Err(err) => self.note_pattern_failure(name, &err),
                    }
                }

                Err(e)
            }
        }
    }

    /// Apply one pattern: enhance the prompt or tools, invoke its agent, transform the output
    pub async fn apply_pattern(&self, name: &str, prompt: &str, ctx: &mut ContextStore) -> Result<AgentResult> {
        let pattern = self.patterns.read().get(name)?.clone();
        let agent = pattern
            .agent
            .clone()
            .unwrap_or_else(|| self.config.default_pattern_agent.clone());

        let (prompt, tool_names) = match pattern.pattern_type {
            PatternType::PromptEnhancement if !pattern.enhancement.is_empty() => {
                (format!("{}\n\n{}", prompt, pattern.enhancement), Vec::new())
            }
            PatternType::ToolEnhancement => (prompt.to_string(), pattern.tools.clone()),
            _ => (prompt.to_string(), Vec::new()),
        };
        let tools = self.tools.resolve(&tool_names);

        let start = Instant::now();
        let outcome = self
            .invoke(&agent, &prompt, &tools, ctx)
            .await
            .map(|result| match pattern.pattern_type {
                PatternType::OutputTransformation => transform_output(result, &pattern),
                _ => result,
            });

        self.record(ctx, &agent, &prompt, &outcome, &tools, start.elapsed(), Some(name));
        outcome
    }

    /// Dispatch, pick the best pattern and its fallback chain, then execute
    pub async fn route_and_execute(&self, prompt: &str, ctx: &mut ContextStore) -> Result<RoutedExecution> {
        let decision = self.dispatcher.dispatch(prompt);
        ctx.merge_shared_state(&decision.to_shared_state());

        let (pattern, fallback_patterns, pattern_agent) = {
            let registry = self.patterns.read();
            let best = registry.find_best_match(prompt);
            let mut chain = vec![best.clone()];
            chain.extend(registry.resolve_fallback_chain(&best, self.config.max_fallback_depth));
            let agent = registry.get(&best).ok().and_then(|p| p.agent.clone());
            (best, chain, agent)
        };

        let agent = decision
            .primary_agents
            .iter()
            .chain(decision.fallback_agents.iter())
            .chain(pattern_agent.iter())
            .find(|a| self.has_agent(a))
            .cloned()
            .unwrap_or_else(|| self.config.default_pattern_agent.clone());

        info!("Routing to {} with patterns {}", agent, fallback_patterns.join(", "));

        let result = self
            .execute_with_pattern_fallback(prompt, &agent, &fallback_patterns, ctx)
            .await?;

        Ok(RoutedExecution {
            decision,
            agent,
            pattern,
            fallback_patterns,
            result,
        })
    }

    /// Invoke without logging: cancellation, timeout and boundary validation
    async fn invoke(&self, name: &str, prompt: &str, tools: &ToolSet, ctx: &ContextStore) -> Result<AgentResult> {
        let agent = self
            .agents
            .get(name)
            .cloned()
            .ok_or_else(|| FusionError::AgentNotRegistered(name.to_string()))?;

        let cancel = ctx.cancellation_token();
        let agent_ctx = AgentContext {
            tools,
            shared_state: ctx.shared_state(),
        };

        let run = async {
            let outcome = match self.config.agent_timeout {
                Some(limit) => match tokio::time::timeout(limit, agent.run(prompt, agent_ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(FusionError::Timeout(name.to_string())),
                },
                None => agent.run(prompt, agent_ctx).await,
            };
            outcome.map_err(|e| FusionError::AgentExecution {
                agent: name.to_string(),
                message: format!("{:#}", e),
            })
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FusionError::Cancelled),
            outcome = run => outcome?,
        };

        result.validate().map_err(|reason| FusionError::InvalidAgentOutput {
            agent: name.to_string(),
            reason,
        })?;

        Ok(result)
    }

    /// Log one invocation and merge its shared state
    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &mut ContextStore,
        agent: &str,
        prompt: &str,
        outcome: &Result<AgentResult>,
        tools: &ToolSet,
        elapsed: Duration,
        pattern: Option<&str>,
    ) {
        let (output, confidence, reported_tools) = match outcome {
            Ok(result) => (
                serde_json::to_value(result).unwrap_or_else(|_| json!({ "output": result.output })),
                result.confidence_or(self.config.default_confidence),
                result.tools_used.clone(),
            ),
            Err(FusionError::AgentNotRegistered(_)) => return,
            Err(e) => (json!({ "error": e.to_string() }), 0.0, Vec::new()),
        };
        let mut tools_used = tools.names();
        tools_used.extend(reported_tools);

        ctx.store_interaction(
            MemoryEntry::new(agent, prompt, output, confidence)
                .with_tools(tools_used)
                .with_execution_time(elapsed)
                .with_pattern(pattern.map(str::to_string)),
        );

        if let Ok(AgentResult {
            shared_state: Some(state),
            ..
        }) = outcome
        {
            ctx.merge_shared_state(state);
        }
    }

    fn note_pattern_failure(&self, name: &str, error: &FusionError) {
        match error {
            FusionError::PatternNotFound(_) => warn!(error = %error, "Skipping fallback pattern"),
            _ => {
                self.patterns.write().record_usage(name, 0.0, false);
                warn!("Fallback pattern {} failed: {}", name, error);
            }
        }
    }
}

/// Rewrite result fields per the pattern's transformation rules
fn transform_output(mut result: AgentResult, pattern: &Pattern) -> AgentResult {
    let Some(transformation) = &pattern.transformation else {
        return result;
    };

    if let Some(context) = &transformation.add_context {
        result.context = Some(context.clone());
    }

    match transformation.enhance_format {
        Some(OutputFormat::Markdown) => {
            result.formatted_output = Some(format!("# Enhanced Output\n\n{}", result.output));
        }
        Some(OutputFormat::Structured) => {
            result.formatted_output = Some(format!(
                "## Analysis\n\n{}\n\n## Recommendations\n\nBased on the analysis above, address the lowest-scoring areas first.",
                result.output
            ));
        }
        None => {}
    }

    result
}
