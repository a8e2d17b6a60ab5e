//! Prompt Dispatcher
//!
//! Classifies a prompt by keyword overlap against routing heuristics, then
//! ranks the suggested agents by their historical scorecard performance.
//! Low-confidence classifications route to a fixed general-purpose pair.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{FusionError, Result};

/// Prompt type used when no heuristic matches
pub const GENERAL_TYPE: &str = "general";

// (type, keywords, primary agents, fallback agents)
static HEURISTICS: &[(&str, &[&str], &[&str], &[&str])] = &[
    (
        "design",
        &["design", "ui", "ux", "interface", "layout", "visual", "user experience"],
        &["principal_designer", "vp_design"],
        &["design_technologist", "evaluator"],
    ),
    (
        "strategy",
        &["strategy", "roadmap", "planning", "business", "market", "executive"],
        &["strategy_pilot", "vp_of_product"],
        &["market_analyst", "evaluator"],
    ),
    (
        "technical",
        &["code", "implementation", "technical", "development", "component", "system"],
        &["design_technologist", "component_librarian"],
        &["product_navigator", "evaluator"],
    ),
    (
        "content",
        &["content", "copy", "text", "narrative", "story", "communication"],
        &["content_designer", "deck_narrator"],
        &["feedback_amplifier", "evaluator"],
    ),
    (
        "analysis",
        &["analyze", "evaluate", "assess", "review", "examine", "study"],
        &["evaluator", "market_analyst"],
        &["strategy_archivist", "research_summarizer"],
    ),
    (
        "creative",
        &["creative", "innovative", "artistic", "cinematic", "visual", "design"],
        &["creative_director", "principal_designer"],
        &["vp_design", "evaluator"],
    ),
];

// (agent, success_rate, avg_confidence, specialties)
static SCORECARD: &[(&str, f64, f64, &[&str])] = &[
    ("vp_design", 0.85, 0.88, &["design", "evaluation"]),
    ("evaluator", 0.90, 0.92, &["analysis", "quality"]),
    ("creative_director", 0.82, 0.85, &["creative", "strategy"]),
    ("design_technologist", 0.88, 0.90, &["technical", "implementation"]),
    ("product_navigator", 0.87, 0.89, &["product", "strategy"]),
    ("strategy_pilot", 0.89, 0.91, &["strategy", "planning"]),
    ("vp_of_product", 0.88, 0.90, &["product", "executive"]),
    ("principal_designer", 0.84, 0.87, &["design", "collaboration"]),
    ("component_librarian", 0.86, 0.89, &["technical", "components"]),
    ("content_designer", 0.83, 0.86, &["content", "copy"]),
    ("strategy_archivist", 0.81, 0.84, &["knowledge", "documentation"]),
    ("market_analyst", 0.87, 0.89, &["market", "analysis"]),
    ("deck_narrator", 0.84, 0.87, &["narrative", "presentation"]),
    ("research_summarizer", 0.86, 0.89, &["research", "synthesis"]),
    ("feedback_amplifier", 0.84, 0.87, &["feedback", "improvement"]),
];

/// One routing rule: prompt type, keywords, agent lists, fallback threshold
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingHeuristic {
    pub prompt_type: String,
    pub keywords: Vec<String>,
    pub primary_agents: Vec<String>,
    pub fallback_agents: Vec<String>,
    pub confidence_threshold: f64,
}

impl RoutingHeuristic {
    pub fn new(prompt_type: &str, keywords: &[&str], primary: &[&str], fallback: &[&str]) -> Self {
        Self {
            prompt_type: prompt_type.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            primary_agents: primary.iter().map(|a| a.to_string()).collect(),
            fallback_agents: fallback.iter().map(|a| a.to_string()).collect(),
            confidence_threshold: 0.7,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn matches(&self, prompt_lower: &str) -> usize {
        self.keywords
            .iter()
            .filter(|k| prompt_lower.contains(k.as_str()))
            .count()
    }
}

fn default_rate() -> f64 {
    0.8
}

/// Historical performance for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    #[serde(default = "default_rate")]
    pub success_rate: f64,
    #[serde(default = "default_rate")]
    pub avg_confidence: f64,
    #[serde(default)]
    pub specialties: Vec<String>,
}

impl AgentScore {
    pub fn composite(&self) -> f64 {
        (self.success_rate + self.avg_confidence) / 2.0
    }
}

impl Default for AgentScore {
    fn default() -> Self {
        Self {
            success_rate: default_rate(),
            avg_confidence: default_rate(),
            specialties: vec![],
        }
    }
}

/// Agent scorecard (read-only input)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentScorecard {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentScore>,
}

impl AgentScorecard {
    /// Scorecard shipped with the binary
    pub fn builtin() -> Self {
        let agents = SCORECARD
            .iter()
            .map(|(name, success_rate, avg_confidence, specialties)| {
                (
                    name.to_string(),
                    AgentScore {
                        success_rate: *success_rate,
                        avg_confidence: *avg_confidence,
                        specialties: specialties.iter().map(|s| s.to_string()).collect(),
                    },
                )
            })
            .collect();
        Self { agents }
    }

    /// Accepts either `{"agents": {...}}` or a bare agent map
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        if value.get("agents").is_some() {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(Self {
                agents: serde_json::from_value(value)?,
            })
        }
    }

    /// Composite score; unknown agents score with 0.8 defaults
    pub fn composite(&self, agent: &str) -> f64 {
        self.agents
            .get(agent)
            .map(AgentScore::composite)
            .unwrap_or_else(|| AgentScore::default().composite())
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Confidence added per matched keyword
    pub keyword_weight: f64,
    /// Below this, the general-purpose safety net is used
    pub low_confidence_cutoff: f64,
    /// Fallback threshold for unknown types
    pub default_threshold: f64,
    pub max_primary: usize,
    pub general_primary: Vec<String>,
    pub general_fallback: Vec<String>,
    pub default_fallback: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.15,
            low_confidence_cutoff: 0.5,
            default_threshold: 0.7,
            max_primary: 2,
            general_primary: vec!["evaluator".into(), "vp_design".into()],
            general_fallback: vec!["creative_director".into(), "product_navigator".into()],
            default_fallback: vec!["evaluator".into()],
        }
    }
}

/// Prompt classification
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub prompt_type: String,
    pub confidence: f64,
    pub suggested_agents: Vec<String>,
}

/// Ephemeral routing outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub prompt_type: String,
    pub confidence: f64,
    pub primary_agents: Vec<String>,
    pub fallback_agents: Vec<String>,
    pub fallback_triggered: bool,
    /// Composite scores for every selected agent, primary first
    pub agent_scores: Vec<(String, f64)>,
}

impl RoutingDecision {
    /// Shared-state entries announcing this decision to later agents
    pub fn to_shared_state(&self) -> Map<String, Value> {
        let scores: Map<String, Value> = self
            .agent_scores
            .iter()
            .map(|(agent, score)| (agent.clone(), json!(score)))
            .collect();

        let mut state = Map::new();
        state.insert("prompt_type".into(), json!(self.prompt_type));
        state.insert("primary_agents".into(), json!(self.primary_agents));
        state.insert("fallback_agents".into(), json!(self.fallback_agents));
        state.insert("fallback_needed".into(), json!(self.fallback_triggered));
        state.insert("agent_scores".into(), Value::Object(scores));
        state
    }
}

/// Keyword dispatcher
pub struct Dispatcher {
    config: DispatcherConfig,
    heuristics: Vec<RoutingHeuristic>,
    scorecard: AgentScorecard,
}

impl Dispatcher {
    /// Built-in heuristics and scorecard
    pub fn new(config: DispatcherConfig) -> Self {
        let heuristics = HEURISTICS
            .iter()
            .map(|(kind, keywords, primary, fallback)| RoutingHeuristic::new(kind, keywords, primary, fallback))
            .collect();

        Self {
            config,
            heuristics,
            scorecard: AgentScorecard::builtin(),
        }
    }

    pub fn with_scorecard(mut self, scorecard: AgentScorecard) -> Self {
        self.scorecard = scorecard;
        self
    }

    /// Load the scorecard from disk; a failed read degrades to an empty scorecard
    pub fn with_scorecard_file(self, path: &Path) -> Self {
        match AgentScorecard::load(path) {
            Ok(scorecard) => {
                info!("Loaded agent scorecard from {} ({} agents)", path.display(), scorecard.agents.len());
                self.with_scorecard(scorecard)
            }
            Err(e) => {
                warn!(
                    error = %FusionError::Persistence(e.to_string()),
                    "Failed to read scorecard {}, using default scores",
                    path.display()
                );
                self.with_scorecard(AgentScorecard::default())
            }
        }
    }

    /// Add a heuristic, replacing one with the same type in place
    pub fn add_heuristic(&mut self, heuristic: RoutingHeuristic) {
        match self
            .heuristics
            .iter_mut()
            .find(|h| h.prompt_type == heuristic.prompt_type)
        {
            Some(existing) => *existing = heuristic,
            None => self.heuristics.push(heuristic),
        }
    }

    pub fn heuristics(&self) -> &[RoutingHeuristic] {
        &self.heuristics
    }

    pub fn scorecard(&self) -> &AgentScorecard {
        &self.scorecard
    }

    /// Highest keyword score wins; first registered wins ties
    pub fn classify(&self, prompt: &str) -> Classification {
        let prompt_lower = prompt.to_lowercase();
        let mut best = Classification {
            prompt_type: GENERAL_TYPE.to_string(),
            confidence: 0.0,
            suggested_agents: vec![],
        };

        for heuristic in &self.heuristics {
            let score = self.config.keyword_weight * heuristic.matches(&prompt_lower) as f64;
            if score > best.confidence {
                best.prompt_type = heuristic.prompt_type.clone();
                best.confidence = score;
                best.suggested_agents = heuristic.primary_agents.clone();
            }
        }

        best.confidence = best.confidence.min(1.0);
        debug!("Classified prompt as {} ({:.2})", best.prompt_type, best.confidence);
        best
    }

    /// Primary and fallback agent lists for a classification
    pub fn select_agents(
        &self,
        prompt_type: &str,
        confidence: f64,
        suggested_agents: &[String],
    ) -> (Vec<String>, Vec<String>) {
        if confidence < self.config.low_confidence_cutoff {
            return (
                self.config.general_primary.clone(),
                self.config.general_fallback.clone(),
            );
        }

        let mut ranked: Vec<(&String, f64)> = suggested_agents
            .iter()
            .map(|a| (a, self.scorecard.composite(a)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let primary = ranked
            .into_iter()
            .take(self.config.max_primary)
            .map(|(a, _)| a.clone())
            .collect();
        let fallback = self
            .heuristic(prompt_type)
            .map(|h| h.fallback_agents.clone())
            .unwrap_or_else(|| self.config.default_fallback.clone());

        (primary, fallback)
    }

    /// Whether `confidence` is below the type's threshold
    pub fn needs_fallback(&self, confidence: f64, prompt_type: &str) -> bool {
        let threshold = self
            .heuristic(prompt_type)
            .map(|h| h.confidence_threshold)
            .unwrap_or(self.config.default_threshold);
        confidence < threshold
    }

    /// Full routing decision for a prompt
    pub fn dispatch(&self, prompt: &str) -> RoutingDecision {
        let classification = self.classify(prompt);
        let (primary, fallback) = self.select_agents(
            &classification.prompt_type,
            classification.confidence,
            &classification.suggested_agents,
        );
        let fallback_triggered = self.needs_fallback(classification.confidence, &classification.prompt_type);

        let mut agent_scores: Vec<(String, f64)> = Vec::new();
        for agent in primary.iter().chain(fallback.iter()) {
            if !agent_scores.iter().any(|(a, _)| a == agent) {
                agent_scores.push((agent.clone(), self.scorecard.composite(agent)));
            }
        }

        info!(
            "Routed prompt: type={} confidence={:.2} primary={:?} fallback_triggered={}",
            classification.prompt_type, classification.confidence, primary, fallback_triggered
        );

        RoutingDecision {
            prompt_type: classification.prompt_type,
            confidence: classification.confidence,
            primary_agents: primary,
            fallback_agents: fallback,
            fallback_triggered,
            agent_scores,
        }
    }

    fn heuristic(&self, prompt_type: &str) -> Option<&RoutingHeuristic> {
        self.heuristics.iter().find(|h| h.prompt_type == prompt_type)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_general() {
        let c = Dispatcher::default().classify("hello there");
        assert_eq!(c.prompt_type, GENERAL_TYPE);
        assert_eq!(c.confidence, 0.0);
        assert!(c.suggested_agents.is_empty());
    }

    #[test]
    fn test_classify_keyword_score() {
        let c = Dispatcher::default().classify("Design the UI layout and interface for the UX team");
        assert_eq!(c.prompt_type, "design");
        assert!((c.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_classify_tie_first_registered() {
        // "visual" appears in both design and creative
        let c = Dispatcher::default().classify("something visual");
        assert_eq!(c.prompt_type, "design");

        let c = Dispatcher::default().classify("a creative design");
        assert_eq!(c.prompt_type, "creative");
    }

    #[test]
    fn test_classify_capped() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.add_heuristic(RoutingHeuristic::new(
            "wide",
            &["a", "b", "c", "d", "e", "f", "g", "h"],
            &["x"],
            &[],
        ));
        let c = dispatcher.classify("a b c d e f g h");
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_select_low_confidence_safety_net() {
        let (primary, fallback) = Dispatcher::default().select_agents("design", 0.45, &["x".into()]);
        assert_eq!(primary, vec!["evaluator", "vp_design"]);
        assert_eq!(fallback, vec!["creative_director", "product_navigator"]);
    }

    #[test]
    fn test_select_ranks_by_scorecard() {
        let suggested = vec!["principal_designer".to_string(), "vp_design".to_string()];
        let (primary, fallback) = Dispatcher::default().select_agents("design", 0.75, &suggested);
        assert_eq!(primary, vec!["vp_design", "principal_designer"]);
        assert_eq!(fallback, vec!["design_technologist", "evaluator"]);

        let (_, fallback) = Dispatcher::default().select_agents("unknown", 0.9, &suggested);
        assert_eq!(fallback, vec!["evaluator"]);
    }

    #[test]
    fn test_needs_fallback_threshold() {
        let dispatcher = Dispatcher::default();
        assert!(dispatcher.needs_fallback(0.69, "design"));
        assert!(!dispatcher.needs_fallback(0.7, "design"));
        assert!(dispatcher.needs_fallback(0.5, "no_such_type"));
    }

    #[test]
    fn test_unreadable_scorecard_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scorecard.json");
        std::fs::write(&path, "not json").unwrap();

        let dispatcher = Dispatcher::default().with_scorecard_file(&path);
        assert!(dispatcher.scorecard().agents.is_empty());
        assert!((dispatcher.scorecard().composite("evaluator") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_scorecard_file_formats() {
        let dir = tempfile::tempdir().unwrap();
        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(&wrapped, r#"{"agents": {"a": {"success_rate": 1.0, "avg_confidence": 0.5}}}"#).unwrap();
        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, r#"{"a": {"success_rate": 1.0}}"#).unwrap();

        assert!((AgentScorecard::load(&wrapped).unwrap().composite("a") - 0.75).abs() < 1e-9);
        assert!((AgentScorecard::load(&bare).unwrap().composite("a") - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_dispatch_decision() {
        let decision = Dispatcher::default().dispatch("Design the UI layout and interface for the UX team");
        assert_eq!(decision.prompt_type, "design");
        assert!(!decision.fallback_triggered);
        assert_eq!(decision.agent_scores.len(), 4);

        let state = decision.to_shared_state();
        assert_eq!(state["prompt_type"], json!("design"));
        assert_eq!(state["fallback_needed"], json!(false));
    }
}
