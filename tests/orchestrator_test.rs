//! Orchestrator Integration Tests
//!
//! Pattern fallback, pipelines and routed execution through the public API.

use async_trait::async_trait;
use fusion_orchestrator::agent::builtin::register_builtins;
use fusion_orchestrator::{
    Agent, AgentContext, AgentResult, ContextStore, Dispatcher, ExecutionOrchestrator, ExecutionState,
    FusionError, OrchestratorConfig, Pattern, PatternRegistry, PatternType,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

struct Fixed {
    name: &'static str,
    confidence: f64,
}

#[async_trait]
impl Agent for Fixed {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, prompt: &str, _ctx: AgentContext<'_>) -> anyhow::Result<AgentResult> {
        Ok(AgentResult::new(format!("{}: {}", self.name, prompt)).with_confidence(self.confidence))
    }
}

struct Broken;

#[async_trait]
impl Agent for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn run(&self, _prompt: &str, _ctx: AgentContext<'_>) -> anyhow::Result<AgentResult> {
        anyhow::bail!("upstream refused the request")
    }
}

/// Returns a result that fails boundary validation
struct Malformed {
    name: &'static str,
    result: AgentResult,
}

#[async_trait]
impl Agent for Malformed {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _prompt: &str, _ctx: AgentContext<'_>) -> anyhow::Result<AgentResult> {
        Ok(self.result.clone())
    }
}

fn setup(helper_confidence: f64) -> ExecutionOrchestrator {
    let mut orchestrator = ExecutionOrchestrator::new(OrchestratorConfig::default(), PatternRegistry::empty().shared());
    orchestrator.register_agent(Arc::new(Fixed { name: "primary", confidence: 0.5 }));
    orchestrator.register_agent(Arc::new(Fixed { name: "helper", confidence: helper_confidence }));
    orchestrator.register_agent(Arc::new(Broken));
    orchestrator.register_pattern("rescue", Pattern::new("rescue", PatternType::AgentEnhancement, "helper"));
    orchestrator
}

#[tokio::test]
async fn test_fallback_returns_improved_result() {
    let orchestrator = setup(0.9);
    let mut ctx = ContextStore::default();

    let result = orchestrator
        .execute_with_pattern_fallback("tidy the layout", "primary", &["rescue".to_string()], &mut ctx)
        .await
        .unwrap();

    assert_eq!(result.output, "helper: tidy the layout");
    assert_eq!(result.confidence, Some(0.9));

    // One entry for the primary, one for the pattern application
    assert_eq!(ctx.len(), 2);
    let entries: Vec<_> = ctx.entries().collect();
    assert_eq!(entries[0].agent_name, "primary");
    assert_eq!(entries[0].pattern_applied, None);
    assert_eq!(entries[1].agent_name, "helper");
    assert_eq!(entries[1].pattern_applied.as_deref(), Some("rescue"));

    let patterns = orchestrator.patterns();
    let stats = patterns.read().stats("rescue").cloned().unwrap();
    assert_eq!(stats.usage_count, 1);
    assert_eq!(stats.success_count, 1);
    assert_eq!(ctx.pattern_stats("rescue").unwrap().success_count, 1);
}

#[tokio::test]
async fn test_fallback_without_improvement_returns_primary() {
    let orchestrator = setup(0.4);
    let mut ctx = ContextStore::default();

    let result = orchestrator
        .execute_with_pattern_fallback("tidy the layout", "primary", &["rescue".to_string()], &mut ctx)
        .await
        .unwrap();

    assert_eq!(result, AgentResult::new("primary: tidy the layout").with_confidence(0.5));
    assert_eq!(ctx.len(), 2);

    let patterns = orchestrator.patterns();
    let stats = patterns.read().stats("rescue").cloned().unwrap();
    assert_eq!(stats.usage_count, 1);
    assert_eq!(stats.success_count, 0);
}

#[tokio::test]
async fn test_fallback_skipped_above_bar() {
    let mut orchestrator = setup(0.9);
    orchestrator.register_agent(Arc::new(Fixed { name: "confident", confidence: 0.85 }));
    let mut ctx = ContextStore::default();

    let result = orchestrator
        .execute_with_pattern_fallback("tidy the layout", "confident", &["rescue".to_string()], &mut ctx)
        .await
        .unwrap();

    assert_eq!(result.output, "confident: tidy the layout");
    assert_eq!(ctx.len(), 1);
}

#[tokio::test]
async fn test_unknown_fallback_pattern_is_skipped() {
    let orchestrator = setup(0.9);
    let mut ctx = ContextStore::default();

    let result = orchestrator
        .execute_with_pattern_fallback(
            "tidy the layout",
            "primary",
            &["missing".to_string(), "rescue".to_string()],
            &mut ctx,
        )
        .await
        .unwrap();

    assert_eq!(result.output, "helper: tidy the layout");
}

#[tokio::test]
async fn test_pipeline_failure_keeps_partial_results() {
    let orchestrator = setup(0.9);
    let mut ctx = ContextStore::default();
    let sequence = vec!["primary".to_string(), "broken".to_string(), "helper".to_string()];

    let result = orchestrator
        .execute_pipeline("draft", Some(sequence.as_slice()), &HashMap::new(), &mut ctx)
        .await;

    assert_eq!(result.status, ExecutionState::Failed);
    assert!(!result.is_success());
    assert!(result.error.as_deref().unwrap().contains("upstream refused"));
    assert_eq!(result.stages[0].state, ExecutionState::Succeeded);
    assert_eq!(result.stages[1].state, ExecutionState::Failed);
    assert_eq!(result.stages[2].state, ExecutionState::Pending);
    assert_eq!(result.completed().len(), 1);
    assert_eq!(result.final_output, "primary: draft");

    // Both attempted stages are logged, the failure with zero confidence
    assert_eq!(ctx.len(), 2);
    let failed = ctx.entries().last().unwrap();
    assert!(failed.is_failure());
    assert_eq!(failed.confidence, 0.0);
}

#[tokio::test]
async fn test_pipeline_threads_outputs() {
    let orchestrator = setup(0.9);
    let mut ctx = ContextStore::default();
    let sequence = vec!["primary".to_string(), "helper".to_string()];

    let result = orchestrator
        .execute_pipeline("draft", Some(sequence.as_slice()), &HashMap::new(), &mut ctx)
        .await;

    assert!(result.is_success());
    assert_eq!(result.final_output, "helper: primary: draft");
    assert_eq!(ctx.entries().last().unwrap().input_prompt, "primary: draft");
}

#[tokio::test]
async fn test_empty_pipeline_is_noop() {
    let orchestrator = setup(0.9);
    let mut ctx = ContextStore::default();

    let result = orchestrator
        .execute_pipeline("untouched", Some(&[][..]), &HashMap::new(), &mut ctx)
        .await;

    assert!(result.is_success());
    assert!(result.stages.is_empty());
    assert_eq!(result.final_output, "untouched");
    assert!(ctx.is_empty());
}

#[tokio::test]
async fn test_cancelled_pipeline_runs_nothing() {
    let orchestrator = setup(0.9);
    let mut ctx = ContextStore::default();
    ctx.cancellation_token().cancel();

    let result = orchestrator.execute_pipeline("draft", None, &HashMap::new(), &mut ctx).await;

    assert_eq!(result.status, ExecutionState::Failed);
    assert!(result.stages.iter().all(|s| s.state == ExecutionState::Pending));
    assert_eq!(result.final_output, "draft");
    assert!(ctx.is_empty());
}

#[test]
fn test_best_match_for_audit_prompt() {
    let registry = PatternRegistry::new();

    assert_eq!(
        registry.find_best_match("Please audit the accessibility of this signup form"),
        "ux_audit"
    );
    assert_eq!(registry.find_best_match("weather tomorrow"), "design_enhancement");
    assert_eq!(
        registry.resolve_fallback_chain("design_enhancement", 5),
        vec!["ux_audit", "trust_building", "basic_evaluation"]
    );
    assert!(registry.validate().is_ok());
}

#[tokio::test]
async fn test_route_with_builtins() {
    let dispatcher = Arc::new(Dispatcher::default());
    let mut orchestrator = ExecutionOrchestrator::new(OrchestratorConfig::default(), PatternRegistry::new().shared())
        .with_dispatcher(Arc::clone(&dispatcher));
    register_builtins(&mut orchestrator, dispatcher);
    let mut ctx = ContextStore::default();

    let routed = orchestrator
        .route_and_execute("Please audit the accessibility of this signup form", &mut ctx)
        .await
        .unwrap();

    assert_eq!(routed.pattern, "ux_audit");
    assert_eq!(routed.fallback_patterns, vec!["ux_audit", "basic_evaluation"]);
    assert!(orchestrator.has_agent(&routed.agent));
    assert!(!routed.result.output.is_empty());
    assert!(!ctx.is_empty());
    assert_eq!(
        ctx.get_shared_state("prompt_type", json!(null)),
        json!(routed.decision.prompt_type)
    );
}

#[tokio::test]
async fn test_invalid_agent_output_is_a_failure() {
    let mut orchestrator = setup(0.9);
    let mut reported = AgentResult::new("looks fine").with_confidence(0.9);
    reported.error = Some("quota exceeded".to_string());
    orchestrator.register_agent(Arc::new(Malformed { name: "reports_error", result: reported }));
    orchestrator.register_agent(Arc::new(Malformed {
        name: "overconfident",
        result: AgentResult::new("sure").with_confidence(1.5),
    }));
    let mut ctx = ContextStore::default();

    for name in ["reports_error", "overconfident"] {
        let err = orchestrator.execute_agent(name, "draft", &[], &mut ctx).await.unwrap_err();
        assert!(matches!(err, FusionError::InvalidAgentOutput { ref agent, .. } if agent == name));

        let logged = ctx.entries().last().unwrap();
        assert_eq!(logged.agent_name, name);
        assert_eq!(logged.confidence, 0.0);
        assert!(logged.is_failure());
    }
    assert_eq!(ctx.len(), 2);
}
