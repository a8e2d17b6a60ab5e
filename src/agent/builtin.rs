//! Built-in agents and tools
//!
//! Keyword heuristics producing templated markdown reports. Only their
//! contract matters to the orchestrator; the report text is illustrative.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::orchestrator::ExecutionOrchestrator;
use super::tools::{Tool, ToolResult};
use super::{Agent, AgentContext, AgentResult};
use crate::router::Dispatcher;

static DESIGN_ELEMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(button|form|navigation|nav|layout|color|typography|icon|modal|dashboard|onboarding|checkout|landing page|sign-up|login)s?\b").unwrap()
});

static USER_NEEDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(accessib\w*|usabilit\w*|trust\w*|clarity|speed|conversion|engagement|retention)\b").unwrap()
});

static CONSTRAINTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(mobile|budget|deadline|brand|legacy|compliance|wcag|gdpr)\b").unwrap()
});

// (criterion, weight, base score, step per indicator, indicators)
static CRITERIA: &[(&str, f64, f64, f64, &[&str])] = &[
    ("clarity", 0.15, 0.7, 0.1, &["clear", "specific", "detailed"]),
    (
        "completeness",
        0.15,
        0.7,
        0.05,
        &["requirements", "specifications", "details", "context", "background", "goals", "objectives", "constraints"],
    ),
    (
        "actionability",
        0.20,
        0.7,
        0.05,
        &["implement", "create", "build", "design", "develop", "improve", "optimize", "enhance", "solve", "fix"],
    ),
    (
        "accuracy",
        0.15,
        0.7,
        0.05,
        &["data", "metrics", "measurements", "standards", "guidelines", "best practices", "research", "analysis"],
    ),
    ("relevance", 0.15, 0.8, 0.1, &["design", "ux", "ui", "product"]),
    (
        "innovation",
        0.10,
        0.6,
        0.1,
        &["innovative", "creative", "novel", "unique", "breakthrough", "revolutionary", "cutting-edge", "next-generation"],
    ),
    (
        "product_value",
        0.10,
        0.7,
        0.05,
        &["business", "product", "market", "customer", "user", "revenue", "growth", "impact", "value", "roi"],
    ),
];

// (heuristic, evidence keywords)
static UX_HEURISTICS: &[(&str, &[&str])] = &[
    ("Visibility of system status", &["loading", "progress", "feedback", "status"]),
    ("Match with the real world", &["language", "copy", "label", "familiar"]),
    ("User control and freedom", &["undo", "cancel", "back", "exit"]),
    ("Consistency and standards", &["consistent", "standard", "pattern", "design system"]),
    ("Error prevention", &["error", "validation", "confirm", "prevent"]),
    ("Accessibility", &["accessib", "contrast", "screen reader", "keyboard", "wcag"]),
];

static TRUST_SIGNALS: &[(&str, &[&str])] = &[
    ("Security", &["security", "secure", "encrypt", "ssl", "2fa"]),
    ("Privacy", &["privacy", "gdpr", "consent", "data"]),
    ("Social proof", &["review", "testimonial", "rating", "customers"]),
    ("Transparency", &["transparent", "pricing", "policy", "explain"]),
    ("Reliability", &["reliab", "uptime", "guarantee", "support"]),
];

fn distinct_matches(re: &Regex, text: &str) -> Vec<String> {
    re.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- None identified\n".to_string();
    }
    items.iter().map(|i| format!("- {}\n", i)).collect()
}

/// Design analysis; runs every tool it is handed
pub struct VpDesignAgent;

#[async_trait]
impl Agent for VpDesignAgent {
    fn name(&self) -> &str {
        "vp_design"
    }

    fn description(&self) -> &str {
        "Design leadership review of UI/UX requests"
    }

    async fn run(&self, prompt: &str, ctx: AgentContext<'_>) -> anyhow::Result<AgentResult> {
        let elements = distinct_matches(&DESIGN_ELEMENTS, prompt);
        let needs = distinct_matches(&USER_NEEDS, prompt);
        let constraints = distinct_matches(&CONSTRAINTS, prompt);

        let mut confidence: f64 = 0.8;
        for found in [&elements, &needs, &constraints] {
            if !found.is_empty() {
                confidence += 0.05;
            }
        }

        let tool_results: Vec<ToolResult> = ctx
            .tools
            .run_all(prompt)
            .await
            .into_iter()
            .filter(|r| r.success)
            .collect();
        if !tool_results.is_empty() {
            let avg = tool_results.iter().map(|r| r.confidence).sum::<f64>() / tool_results.len() as f64;
            confidence = (confidence + avg) / 2.0;
        }
        let confidence = confidence.min(0.95);

        let mut output = format!(
            "# VP Design Review\n\n## Request\n{}\n\n## Design Elements\n{}\n## User Needs\n{}\n## Constraints\n{}",
            prompt,
            bullet_list(&elements),
            bullet_list(&needs),
            bullet_list(&constraints)
        );
        for result in &tool_results {
            output.push_str(&format!("\n## Tool: {}\n{}\n", result.tool_name, result.content));
        }
        output.push_str(&format!("\n**Confidence:** {:.2}\n", confidence));

        Ok(AgentResult::new(output)
            .with_confidence(confidence)
            .with_tools_used(tool_results.iter().map(|r| r.tool_name.clone()).collect())
            .with_shared_state("design_elements", json!(elements)))
    }
}

/// Weighted multi-criteria evaluation; reports `overall_score`
pub struct EvaluatorAgent;

impl EvaluatorAgent {
    /// Per-criterion scores and the weighted overall score
    pub fn score(prompt: &str) -> (Vec<(&'static str, f64)>, f64) {
        let lower = prompt.to_lowercase();
        let mut scores = Vec::with_capacity(CRITERIA.len());
        let mut total = 0.0;
        let mut total_weight = 0.0;

        for (criterion, weight, base, step, indicators) in CRITERIA {
            let hits = indicators.iter().filter(|i| lower.contains(*i)).count();
            let score = (base + step * hits as f64).min(1.0);
            scores.push((*criterion, score));
            total += score * weight;
            total_weight += weight;
        }

        (scores, total / total_weight)
    }
}

#[async_trait]
impl Agent for EvaluatorAgent {
    fn name(&self) -> &str {
        "evaluator"
    }

    fn description(&self) -> &str {
        "Scores a request or draft across weighted quality criteria"
    }

    async fn run(&self, prompt: &str, _ctx: AgentContext<'_>) -> anyhow::Result<AgentResult> {
        let (scores, overall) = Self::score(prompt);

        let mut output = format!("# Evaluation Report\n\n## Overall Score: {:.2}/1.00\n\n", overall);
        for (criterion, score) in &scores {
            output.push_str(&format!("- **{}:** {:.2}\n", criterion, score));
        }

        let weak: Vec<&str> = scores.iter().filter(|(_, s)| *s < 0.7).map(|(c, _)| *c).collect();
        if !weak.is_empty() {
            output.push_str(&format!("\n## Needs Improvement\n{}\n", weak.join(", ")));
        }

        Ok(AgentResult::new(output)
            .with_confidence(overall)
            .with_extra("overall_score", json!(overall))
            .with_shared_state("last_evaluation_score", json!(overall)))
    }
}

/// Critique and rewrite of a draft
pub struct CreativeDirectorAgent;

impl CreativeDirectorAgent {
    /// Feedback lines, rewritten text and the confidence lift earned
    pub fn critique(draft: &str) -> (Vec<&'static str>, String, f64) {
        let mut feedback = Vec::new();
        let mut lift = 0.1;
        let mut enhanced = draft.to_string();

        if draft.contains("too verbose") || draft.contains("unclear") {
            feedback.push("Output is unclear or verbose. Needs more punch.");
            enhanced = enhanced
                .replace("too verbose", "concise")
                .replace("unclear", "sharp and direct");
            lift = 0.2;
        }
        if !draft.to_lowercase().contains("value") {
            feedback.push("Missing clear value proposition.");
            enhanced.push_str(" → Refocus on the outcome or benefit.");
        }
        if feedback.is_empty() {
            feedback.push("Output is solid, but consider adding edge or provocation.");
        }

        (feedback, enhanced, lift)
    }
}

#[async_trait]
impl Agent for CreativeDirectorAgent {
    fn name(&self) -> &str {
        "creative_director"
    }

    fn description(&self) -> &str {
        "Creative critique and rewrite"
    }

    async fn run(&self, prompt: &str, _ctx: AgentContext<'_>) -> anyhow::Result<AgentResult> {
        let (feedback, enhanced, lift) = Self::critique(prompt);
        let confidence = (0.7_f64 + lift).min(0.95);

        let output = format!(
            "# Creative Direction\n\n## Feedback\n{}\n## Direction\n{}\n",
            feedback.iter().map(|f| format!("- {}\n", f)).collect::<String>(),
            enhanced
        );

        Ok(AgentResult::new(output)
            .with_confidence(confidence)
            .with_enhanced_output(enhanced)
            .with_extra("score_lift", json!(lift)))
    }
}

/// Routing analysis as an agent; publishes the decision to shared state
pub struct DispatcherAgent {
    dispatcher: Arc<Dispatcher>,
}

impl DispatcherAgent {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Agent for DispatcherAgent {
    fn name(&self) -> &str {
        "dispatcher"
    }

    fn description(&self) -> &str {
        "Classifies the prompt and selects primary/fallback agents"
    }

    async fn run(&self, prompt: &str, _ctx: AgentContext<'_>) -> anyhow::Result<AgentResult> {
        let decision = self.dispatcher.dispatch(prompt);

        let scores: String = decision
            .agent_scores
            .iter()
            .map(|(agent, score)| format!("- **{}:** {:.3}\n", agent, score))
            .collect();
        let output = format!(
            "# Dispatcher Analysis\n\n**Prompt Type:** {}\n**Confidence:** {:.2}/1.00\n\n\
             **Primary Agents:** {}\n**Fallback Agents:** {}\n**Fallback Triggered:** {}\n\n\
             ## Agent Performance Scores\n{}",
            decision.prompt_type,
            decision.confidence,
            decision.primary_agents.join(", "),
            decision.fallback_agents.join(", "),
            if decision.fallback_triggered { "Yes" } else { "No" },
            scores
        );

        let mut result = AgentResult::new(output).with_confidence(decision.confidence);
        result.shared_state = Some(decision.to_shared_state());
        Ok(result)
    }
}

fn signal_report(title: &str, table: &[(&str, &[&str])], input: &str) -> (String, f64, Vec<String>) {
    let lower = input.to_lowercase();
    let covered: Vec<String> = table
        .iter()
        .filter(|(_, keys)| keys.iter().any(|k| lower.contains(k)))
        .map(|(name, _)| name.to_string())
        .collect();
    let missing: Vec<String> = table
        .iter()
        .map(|(name, _)| name.to_string())
        .filter(|name| !covered.contains(name))
        .collect();

    let confidence = 0.7 + 0.25 * covered.len() as f64 / table.len() as f64;
    let content = format!(
        "### {}\n**Addressed:**\n{}**Gaps:**\n{}",
        title,
        bullet_list(&covered),
        bullet_list(&missing)
    );
    (content, confidence, missing)
}

/// Heuristic UX audit
pub struct UxAuditTool;

#[async_trait]
impl Tool for UxAuditTool {
    fn name(&self) -> &str {
        "ux_audit"
    }

    fn description(&self) -> &str {
        "Checks a request against usability heuristics"
    }

    async fn run(&self, input: &str) -> anyhow::Result<ToolResult> {
        let (content, confidence, gaps) = signal_report("UX Heuristic Audit", UX_HEURISTICS, input);
        Ok(ToolResult::success("ux_audit", content, confidence).with_data(json!({ "gaps": gaps })))
    }
}

/// Trust-signal explainer
pub struct TrustExplainerTool;

#[async_trait]
impl Tool for TrustExplainerTool {
    fn name(&self) -> &str {
        "trust_explainer"
    }

    fn description(&self) -> &str {
        "Identifies trust signals present in and missing from a request"
    }

    async fn run(&self, input: &str) -> anyhow::Result<ToolResult> {
        let (content, confidence, gaps) = signal_report("Trust Signals", TRUST_SIGNALS, input);
        Ok(ToolResult::success("trust_explainer", content, confidence).with_data(json!({ "gaps": gaps })))
    }
}

/// Register the built-in tools and agents
pub fn register_builtins(orchestrator: &mut ExecutionOrchestrator, dispatcher: Arc<Dispatcher>) {
    orchestrator.register_tool(Arc::new(UxAuditTool));
    orchestrator.register_tool(Arc::new(TrustExplainerTool));

    orchestrator.register_agent(Arc::new(VpDesignAgent));
    orchestrator.register_agent(Arc::new(CreativeDirectorAgent));
    orchestrator.register_agent(Arc::new(EvaluatorAgent));
    orchestrator.register_agent(Arc::new(DispatcherAgent::new(dispatcher)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolSet;
    use crate::memory::SharedState;

    #[test]
    fn test_evaluator_baseline() {
        let (scores, overall) = EvaluatorAgent::score("hello");
        assert_eq!(scores.len(), 7);
        // every criterion at its base score
        assert!((overall - 0.705).abs() < 1e-9);
    }

    #[test]
    fn test_evaluator_scores_capped() {
        let (scores, overall) = EvaluatorAgent::score(
            "innovative creative novel unique breakthrough revolutionary cutting-edge next-generation",
        );
        let innovation = scores.iter().find(|(c, _)| *c == "innovation").unwrap().1;
        assert_eq!(innovation, 1.0);
        assert!(overall <= 1.0);
    }

    #[test]
    fn test_creative_critique() {
        let (feedback, enhanced, lift) = CreativeDirectorAgent::critique("This is unclear");
        assert_eq!(lift, 0.2);
        assert!(feedback.contains(&"Missing clear value proposition."));
        assert!(enhanced.starts_with("This is sharp and direct"));

        let (feedback, _, lift) = CreativeDirectorAgent::critique("Clear value for users");
        assert_eq!(lift, 0.1);
        assert_eq!(feedback.len(), 1);
    }

    #[tokio::test]
    async fn test_vp_design_uses_tools() {
        let mut registry = crate::agent::ToolRegistry::new();
        registry.register(Arc::new(UxAuditTool));
        let tools = registry.resolve(&["ux_audit".to_string()]);
        let state = SharedState::new();

        let result = VpDesignAgent
            .run(
                "Redesign the checkout form for accessibility on mobile",
                AgentContext { tools: &tools, shared_state: &state },
            )
            .await
            .unwrap();

        assert_eq!(result.tools_used, vec!["ux_audit"]);
        assert!(result.output.contains("## Tool: ux_audit"));
        let confidence = result.confidence.unwrap();
        assert!(confidence > 0.0 && confidence <= 0.95);
        assert!(result.validate().is_ok());
    }

    #[tokio::test]
    async fn test_dispatcher_agent_publishes_state() {
        let agent = DispatcherAgent::new(Arc::new(Dispatcher::default()));
        let tools = ToolSet::new();
        let state = SharedState::new();

        let result = agent
            .run("Design the UI layout and interface for the UX team", AgentContext { tools: &tools, shared_state: &state })
            .await
            .unwrap();

        let shared = result.shared_state.unwrap();
        assert_eq!(shared["prompt_type"], json!("design"));
        assert!(shared.contains_key("agent_scores"));
    }
}
