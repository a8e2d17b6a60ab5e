//! Pattern Registry
//!
//! Named routing/enhancement rules: trigger keywords, a target agent, a
//! confidence threshold, an ordered fallback chain and an enhancement payload.
//!
//! - Registration order is preserved and breaks `find_best_match` ties
//! - Re-registering a name overwrites in place and resets its statistics
//! - Fallback chains are validated for cycles; traversal is depth-capped

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{FusionError, Result};

/// Default pattern returned when nothing matches
pub const DEFAULT_PATTERN: &str = "design_enhancement";

/// Default cap on transitive fallback traversal
pub const MAX_FALLBACK_DEPTH: usize = 5;

/// Registry shared across requests; never hold the lock across an await
pub type SharedRegistry = Arc<RwLock<PatternRegistry>>;

/// How a pattern alters an agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    PromptEnhancement,
    ToolEnhancement,
    AgentEnhancement,
    OutputTransformation,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::PromptEnhancement => "prompt_enhancement",
            PatternType::ToolEnhancement => "tool_enhancement",
            PatternType::AgentEnhancement => "agent_enhancement",
            PatternType::OutputTransformation => "output_transformation",
        }
    }
}

/// Output rewrite style for `output_transformation` patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Markdown,
    Structured,
}

/// Result-field rewrite rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    /// Copied into the result's `context` field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance_format: Option<OutputFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMetadata {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub custom: bool,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for PatternMetadata {
    fn default() -> Self {
        Self {
            category: String::new(),
            tags: vec![],
            created: Utc::now(),
            version: default_version(),
            custom: false,
        }
    }
}

/// Literal prompt/output pair captured by the promoter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedTemplate {
    pub source_prompt: String,
    pub output: String,
    pub score: f64,
    pub promoted_at: DateTime<Utc>,
}

/// A named routing/enhancement rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// Target agent; the orchestrator's default applies when unset
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub confidence_threshold: f64,
    #[serde(default)]
    pub fallback_patterns: Vec<String>,
    #[serde(default)]
    pub enhancement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Transformation>,
    #[serde(default)]
    pub metadata: PatternMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted: Option<PromotedTemplate>,
}

impl Pattern {
    pub fn new(name: &str, pattern_type: PatternType, agent: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern_type,
            agent: Some(agent.to_string()),
            triggers: vec![],
            tools: vec![],
            confidence_threshold: 0.8,
            fallback_patterns: vec![],
            enhancement: String::new(),
            transformation: None,
            metadata: PatternMetadata::default(),
            promoted: None,
        }
    }

    pub fn with_triggers(mut self, triggers: &[&str]) -> Self {
        self.triggers = triggers.iter().map(|t| t.to_lowercase()).collect();
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: &[&str]) -> Self {
        self.fallback_patterns = fallbacks.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_enhancement(mut self, enhancement: &str) -> Self {
        self.enhancement = enhancement.to_string();
        self
    }

    pub fn with_transformation(mut self, transformation: Transformation) -> Self {
        self.transformation = Some(transformation);
        self
    }

    pub fn with_category(mut self, category: &str, tags: &[&str]) -> Self {
        self.metadata.category = category.to_string();
        self.metadata.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Equal in everything but creation time
    pub fn same_definition(&self, other: &Pattern) -> bool {
        let mut other = other.clone();
        other.metadata.created = self.metadata.created;
        *self == other
    }

    /// Number of trigger keywords found as substrings of an already-lowercased prompt
    pub fn match_count(&self, prompt_lower: &str) -> usize {
        self.triggers
            .iter()
            .filter(|t| !t.is_empty() && prompt_lower.contains(t.as_str()))
            .count()
    }
}

/// Usage statistics for one pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub usage_count: u64,
    pub success_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub avg_confidence: f64,
}

impl PatternStats {
    /// Fold one usage into the running statistics (incremental mean)
    pub fn record(&mut self, confidence: f64, success: bool, at: DateTime<Utc>) {
        self.usage_count += 1;
        if success {
            self.success_count += 1;
        }
        self.last_used = Some(at);
        self.avg_confidence += (confidence - self.avg_confidence) / self.usage_count as f64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.usage_count as f64
        }
    }
}

/// On-disk pattern library
#[derive(Debug, Default, Serialize, Deserialize)]
struct PatternLibrary {
    #[serde(default)]
    patterns: Vec<Pattern>,
    #[serde(default)]
    usage_stats: BTreeMap<String, PatternStats>,
}

/// Pattern registry
pub struct PatternRegistry {
    patterns: Vec<Pattern>,
    index: HashMap<String, usize>,
    stats: HashMap<String, PatternStats>,
    default_pattern: String,
}

impl PatternRegistry {
    /// Registry seeded with the built-in patterns
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for pattern in builtin_patterns() {
            registry.register(&pattern.name.clone(), pattern);
        }
        registry
    }

    /// Registry with no patterns
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            index: HashMap::new(),
            stats: HashMap::new(),
            default_pattern: DEFAULT_PATTERN.to_string(),
        }
    }

    pub fn with_default_pattern(mut self, name: &str) -> Self {
        self.default_pattern = name.to_string();
        self
    }

    /// Wrap for cross-request sharing
    pub fn shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn default_pattern(&self) -> &str {
        &self.default_pattern
    }

    /// Insert or overwrite; overwriting keeps registration position and resets stats.
    /// Re-registering an identical pattern is a no-op.
    pub fn register(&mut self, name: &str, mut pattern: Pattern) {
        pattern.name = name.to_string();
        pattern.triggers = pattern
            .triggers
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if !(0.0..=1.0).contains(&pattern.confidence_threshold) {
            warn!(
                "Pattern {} threshold {} outside [0, 1], clamping",
                name, pattern.confidence_threshold
            );
            pattern.confidence_threshold = pattern.confidence_threshold.clamp(0.0, 1.0);
        }

        match self.index.get(name) {
            Some(&idx) if self.patterns[idx].same_definition(&pattern) => {
                debug!("Pattern {} unchanged", name);
                return;
            }
            Some(&idx) => {
                warn!("Pattern {} already exists, updating", name);
                self.patterns[idx] = pattern;
            }
            None => {
                self.index.insert(name.to_string(), self.patterns.len());
                self.patterns.push(pattern);
            }
        }
        self.stats.insert(name.to_string(), PatternStats::default());

        info!("Registered pattern: {}", name);
    }

    /// Register a user-defined pattern (category defaults to `custom`)
    pub fn create_custom(&mut self, mut pattern: Pattern) {
        pattern.metadata.custom = true;
        if pattern.metadata.category.is_empty() {
            pattern.metadata.category = "custom".to_string();
        }
        let name = pattern.name.clone();
        self.register(&name, pattern);
        info!("Created custom pattern: {}", name);
    }

    pub fn get(&self, name: &str) -> Result<&Pattern> {
        self.index
            .get(name)
            .map(|&idx| &self.patterns[idx])
            .ok_or_else(|| FusionError::PatternNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Pattern names in registration order, optionally filtered by category
    pub fn list(&self, category: Option<&str>) -> Vec<&str> {
        self.patterns
            .iter()
            .filter(|p| category.map_or(true, |c| p.metadata.category == c))
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Pattern with the most trigger-keyword hits; first registered wins ties
    pub fn find_best_match(&self, prompt: &str) -> String {
        let prompt_lower = prompt.to_lowercase();

        let mut best: Option<(&Pattern, usize)> = None;
        for pattern in &self.patterns {
            let count = pattern.match_count(&prompt_lower);
            if count > 0 && best.map_or(true, |(_, c)| count > c) {
                best = Some((pattern, count));
            }
        }

        match best {
            Some((pattern, _)) => pattern.name.clone(),
            None => self.default_pattern.clone(),
        }
    }

    /// Declared fallback list, verbatim
    pub fn fallback_chain(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|p| p.fallback_patterns.clone())
            .unwrap_or_default()
    }

    /// Transitive fallbacks in visit order, without repeats, at most `max_depth` levels deep
    pub fn resolve_fallback_chain(&self, name: &str, max_depth: usize) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::from([name]);
        let mut chain = Vec::new();
        let mut frontier: Vec<&str> = vec![name];

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for current in frontier {
                let Ok(pattern) = self.get(current) else {
                    continue;
                };
                for fallback in &pattern.fallback_patterns {
                    if visited.insert(fallback.as_str()) {
                        chain.push(fallback.clone());
                        next.push(fallback.as_str());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        chain
    }

    /// Reject cyclic fallback configuration
    pub fn validate(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            registry: &'a PatternRegistry,
            name: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == name).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(name.to_string());
                    return Err(FusionError::FallbackCycle(cycle));
                }
                None => {}
            }

            marks.insert(name, Mark::Visiting);
            path.push(name);
            if let Ok(pattern) = registry.get(name) {
                for fallback in &pattern.fallback_patterns {
                    visit(registry, fallback, marks, path)?;
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for pattern in &self.patterns {
            visit(self, &pattern.name, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }

    pub fn record_usage(&mut self, name: &str, confidence: f64, success: bool) {
        self.stats
            .entry(name.to_string())
            .or_default()
            .record(confidence, success, Utc::now());

        info!(
            "Recorded usage for pattern {}: confidence={:.2}, success={}",
            name, confidence, success
        );
    }

    pub fn stats(&self, name: &str) -> Option<&PatternStats> {
        self.stats.get(name)
    }

    /// Patterns ranked by (success rate, usage count), both descending
    pub fn top_patterns(&self, n: usize) -> Vec<(&Pattern, PatternStats)> {
        let mut ranked: Vec<(&Pattern, PatternStats)> = self
            .patterns
            .iter()
            .map(|p| (p, self.stats.get(&p.name).cloned().unwrap_or_default()))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.success_rate()
                .total_cmp(&a.1.success_rate())
                .then(b.1.usage_count.cmp(&a.1.usage_count))
        });
        ranked.truncate(n);
        ranked
    }

    /// Whether a result at `confidence` is below the pattern's bar
    pub fn should_apply(&self, name: &str, confidence: f64) -> bool {
        self.get(name)
            .map(|p| confidence < p.confidence_threshold)
            .unwrap_or(false)
    }

    pub fn enhancement(&self, name: &str) -> &str {
        self.get(name).map(|p| p.enhancement.as_str()).unwrap_or("")
    }

    pub fn tools(&self, name: &str) -> &[String] {
        self.get(name).map(|p| p.tools.as_slice()).unwrap_or(&[])
    }

    /// Markdown overview grouped by category
    pub fn summary(&self) -> String {
        let mut categories: Vec<(&str, Vec<&Pattern>)> = Vec::new();
        for pattern in &self.patterns {
            let category = if pattern.metadata.category.is_empty() {
                "unknown"
            } else {
                pattern.metadata.category.as_str()
            };
            match categories.iter_mut().find(|(c, _)| *c == category) {
                Some((_, members)) => members.push(pattern),
                None => categories.push((category, vec![pattern])),
            }
        }

        let mut summary = format!(
            "# Pattern Registry Summary\n\n**Total Patterns:** {}\n**Categories:** {}\n\n## Pattern Categories\n\n",
            self.patterns.len(),
            categories.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ")
        );

        for (category, members) in categories {
            summary.push_str(&format!("### {}\n", title_case(category)));
            for pattern in members {
                let stats = self.stats.get(&pattern.name).cloned().unwrap_or_default();
                summary.push_str(&format!(
                    "- **{}:** {} uses, {:.2} success rate\n",
                    pattern.name,
                    stats.usage_count,
                    stats.success_rate()
                ));
            }
            summary.push('\n');
        }

        summary
    }

    /// Merge patterns from a JSON library file; returns how many were loaded
    pub fn load_library(&mut self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let library: PatternLibrary = serde_json::from_str(&raw)?;

        let count = library.patterns.len();
        for pattern in library.patterns {
            let name = pattern.name.clone();
            self.register(&name, pattern);
        }
        self.stats.extend(library.usage_stats);

        info!("Imported {} patterns from {}", count, path.display());
        Ok(count)
    }

    /// Write every pattern and its statistics to a JSON library file
    pub fn save_library(&self, path: &Path) -> Result<()> {
        let library = PatternLibrary {
            patterns: self.patterns.clone(),
            usage_stats: self
                .stats
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&library)?)?;

        info!("Exported patterns to {}", path.display());
        Ok(())
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn builtin_patterns() -> Vec<Pattern> {
    vec![
        Pattern::new("design_enhancement", PatternType::PromptEnhancement, "vp_design")
            .with_triggers(&["design", "ui", "ux", "interface", "layout", "accessibility"])
            .with_enhancement(
                "Apply user-centered design principles and ensure accessibility compliance. \
                 Focus on visual hierarchy, consistency, and user experience optimization.",
            )
            .with_threshold(0.8)
            .with_fallbacks(&["ux_audit", "trust_building"])
            .with_category("design", &["ui", "ux", "accessibility"]),
        Pattern::new("ux_audit", PatternType::ToolEnhancement, "vp_design")
            .with_triggers(&["audit", "evaluate", "review", "ux", "usability", "accessibility"])
            .with_tools(&["ux_audit"])
            .with_enhancement(
                "Perform comprehensive UX audit using heuristic evaluation and metrics analysis.",
            )
            .with_threshold(0.85)
            .with_fallbacks(&["basic_evaluation"])
            .with_category("ux", &["audit", "heuristics", "metrics"]),
        Pattern::new("trust_building", PatternType::ToolEnhancement, "vp_design")
            .with_triggers(&["trust", "security", "privacy", "reliability"])
            .with_tools(&["trust_explainer"])
            .with_enhancement("Analyze and enhance trust-building elements in the user experience.")
            .with_threshold(0.8)
            .with_fallbacks(&["basic_evaluation"])
            .with_category("trust", &["transparency", "security", "social_proof"]),
        Pattern::new("comprehensive_evaluation", PatternType::AgentEnhancement, "evaluator")
            .with_triggers(&["evaluate", "assess", "score", "analyze"])
            .with_enhancement(
                "Perform comprehensive evaluation across all criteria with detailed scoring and recommendations.",
            )
            .with_threshold(0.9)
            .with_fallbacks(&["basic_evaluation"])
            .with_category("evaluation", &["scoring", "analysis", "recommendations"]),
        Pattern::new("basic_evaluation", PatternType::AgentEnhancement, "evaluator")
            .with_triggers(&["check", "review", "basic", "simple"])
            .with_enhancement("Perform basic evaluation with essential criteria.")
            .with_threshold(0.7)
            .with_category("evaluation", &["basic", "essential"]),
    ]
}
