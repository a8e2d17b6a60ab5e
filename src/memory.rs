//! Session Context Store
//!
//! Append-only interaction log with a bounded FIFO window, a key-value shared
//! state blackboard, and per-pattern usage statistics. One store per session;
//! it also owns the session's cancellation token.
//!
//! Persistence is a single JSON document (`memory`, `patterns`, `shared_state`)
//! rewritten wholesale on every mutation. Write failures are logged and
//! swallowed so orchestration never blocks on the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FusionError, Result};
use crate::patterns::PatternStats;

/// Default retention window
pub const DEFAULT_MEMORY_CAP: usize = 100;

/// One record per agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub input_prompt: String,
    pub output: Value,
    pub confidence: f64,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub execution_time: Duration,
    #[serde(default)]
    pub pattern_applied: Option<String>,
}

impl MemoryEntry {
    /// Create an entry stamped with the current time
    pub fn new(agent_name: &str, input_prompt: &str, output: Value, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            timestamp: Utc::now(),
            agent_name: agent_name.to_string(),
            input_prompt: input_prompt.to_string(),
            output,
            confidence,
            tools_used: vec![],
            execution_time: Duration::ZERO,
            pattern_applied: None,
        }
    }

    /// Set tools used (duplicates dropped, order kept)
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        self.tools_used = tools.into_iter().filter(|t| seen.insert(t.clone())).collect();
        self
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed;
        self
    }

    pub fn with_pattern(mut self, pattern: Option<String>) -> Self {
        self.pattern_applied = pattern;
        self
    }

    /// Textual output recorded for this entry
    pub fn output_text(&self) -> &str {
        match &self.output {
            Value::String(s) => s,
            other => other.get("output").and_then(Value::as_str).unwrap_or(""),
        }
    }

    /// Recorded quality score: explicit `overall_score` or the entry confidence
    pub fn quality_score(&self) -> f64 {
        self.output
            .get("overall_score")
            .and_then(Value::as_f64)
            .unwrap_or(self.confidence)
    }

    /// Whether this entry records a failed invocation
    pub fn is_failure(&self) -> bool {
        self.output.get("error").is_some()
    }
}

/// Session blackboard (last writer wins per key)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedState(Map<String, Value>);

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Value for `key`, or `default` when unset
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.0.get(key).cloned().unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        debug!("Set shared state {}: {}", key, value);
        self.0.insert(key.to_string(), value);
    }

    /// Merge a map of entries, overwriting existing keys
    pub fn merge(&mut self, entries: &Map<String, Value>) {
        for (key, value) in entries {
            self.set(key, value.clone());
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Persisted JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub memory: Vec<MemoryEntry>,
    #[serde(default)]
    pub patterns: BTreeMap<String, PatternStats>,
    #[serde(default)]
    pub shared_state: SharedState,
}

/// Storage behind the context store
pub trait MemoryBackend: Send + Sync {
    /// Load the stored snapshot; `None` when nothing has been stored yet
    fn load(&self) -> Result<Option<StoreSnapshot>>;

    /// Replace the stored snapshot
    fn save(&self, snapshot: &StoreSnapshot) -> Result<()>;

    fn describe(&self) -> String;
}

/// Whole-document JSON file backend
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MemoryBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Context store configuration
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Maximum retained entries (oldest evicted first)
    pub memory_cap: usize,
    /// Minimum word-overlap score for `relevant_memory`
    pub min_relevance: f64,
    /// Confidence above which a pattern-tagged entry counts as a success
    pub pattern_success_confidence: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            memory_cap: DEFAULT_MEMORY_CAP,
            min_relevance: 0.1,
            pattern_success_confidence: 0.7,
        }
    }
}

/// Aggregate execution statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStats {
    pub count: usize,
    pub avg_confidence: f64,
    pub avg_execution_time: Duration,
    pub session_id: String,
}

/// Per-session memory, shared state and pattern statistics
pub struct ContextStore {
    config: ContextConfig,
    session_id: String,
    started_at: DateTime<Utc>,
    entries: VecDeque<MemoryEntry>,
    shared_state: SharedState,
    pattern_stats: BTreeMap<String, PatternStats>,
    backend: Option<Box<dyn MemoryBackend>>,
    cancel: CancellationToken,
}

impl ContextStore {
    /// In-memory store
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            entries: VecDeque::new(),
            shared_state: SharedState::new(),
            pattern_stats: BTreeMap::new(),
            backend: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Store backed by persistent storage; load failures fall back to empty state
    pub fn with_backend(config: ContextConfig, backend: Box<dyn MemoryBackend>) -> Self {
        let mut store = Self::new(config);

        match backend.load() {
            Ok(Some(snapshot)) => {
                store.restore(snapshot);
                info!(
                    "Context store loaded from {} ({} entries)",
                    backend.describe(),
                    store.entries.len()
                );
            }
            Ok(None) => info!("Context store initialized: {}", backend.describe()),
            Err(e) => warn!(
                error = %FusionError::Persistence(e.to_string()),
                "Failed to load {}, starting empty",
                backend.describe()
            ),
        }

        store.backend = Some(backend);
        store
    }

    /// Store backed by a JSON file
    pub fn open(path: &Path, config: ContextConfig) -> Self {
        Self::with_backend(config, Box::new(JsonFileBackend::new(path)))
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token that aborts in-flight agent runs for this session
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append an interaction. Never fails.
    pub fn store_interaction(&mut self, entry: MemoryEntry) {
        if let Some(pattern) = &entry.pattern_applied {
            let success = entry.confidence > self.config.pattern_success_confidence;
            self.pattern_stats
                .entry(pattern.clone())
                .or_default()
                .record(entry.confidence, success, entry.timestamp);
        }

        info!(
            "Stored interaction for {} with confidence {:.2}",
            entry.agent_name, entry.confidence
        );
        self.entries.push_back(entry);
        self.evict();
        self.persist();
    }

    /// Stored entries, oldest first
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &MemoryEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<&MemoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    /// Entries ranked by word overlap with `query`, ties broken by recency
    pub fn relevant_memory(&self, query: &str, limit: usize) -> Vec<&MemoryEntry> {
        if limit == 0 {
            return vec![];
        }

        let query_words = words(query);
        let denominator = query_words.len().max(1) as f64;

        let mut scored: Vec<(f64, usize, &MemoryEntry)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let overlap = words(&entry.input_prompt).intersection(&query_words).count();
                let score = overlap as f64 / denominator;
                (overlap > 0 && score >= self.config.min_relevance).then_some((score, idx, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        scored.into_iter().take(limit).map(|(_, _, e)| e).collect()
    }

    pub fn shared_state(&self) -> &SharedState {
        &self.shared_state
    }

    pub fn get_shared_state(&self, key: &str, default: Value) -> Value {
        self.shared_state.get_or(key, default)
    }

    pub fn set_shared_state(&mut self, key: &str, value: Value) {
        self.shared_state.set(key, value);
        self.persist();
    }

    /// Merge an agent's shared-state payload
    pub fn merge_shared_state(&mut self, entries: &Map<String, Value>) {
        if entries.is_empty() {
            return;
        }
        self.shared_state.merge(entries);
        self.persist();
    }

    pub fn pattern_stats(&self, name: &str) -> Option<&PatternStats> {
        self.pattern_stats.get(name)
    }

    pub fn all_pattern_stats(&self) -> &BTreeMap<String, PatternStats> {
        &self.pattern_stats
    }

    /// Means over all stored entries; zeros when empty
    pub fn execution_stats(&self) -> ExecutionStats {
        let count = self.entries.len();
        if count == 0 {
            return ExecutionStats {
                count: 0,
                avg_confidence: 0.0,
                avg_execution_time: Duration::ZERO,
                session_id: self.session_id.clone(),
            };
        }

        let total_confidence: f64 = self.entries.iter().map(|e| e.confidence).sum();
        let total_time: Duration = self.entries.iter().map(|e| e.execution_time).sum();

        ExecutionStats {
            count,
            avg_confidence: total_confidence / count as f64,
            avg_execution_time: total_time / count as u32,
            session_id: self.session_id.clone(),
        }
    }

    /// Explicit session reset
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pattern_stats.clear();
        self.shared_state.clear();
        self.persist();
        info!("Context cleared");
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            memory: self.entries.iter().cloned().collect(),
            patterns: self.pattern_stats.clone(),
            shared_state: self.shared_state.clone(),
        }
    }

    /// Write the current snapshot to `path`
    pub fn export(&self, path: &Path) -> Result<()> {
        JsonFileBackend::new(path).save(&self.snapshot())?;
        info!("Memory exported to {}", path.display());
        Ok(())
    }

    /// Merge a snapshot file into this store; returns the number of entries read
    pub fn import(&mut self, path: &Path) -> Result<usize> {
        let snapshot = JsonFileBackend::new(path)
            .load()?
            .ok_or_else(|| FusionError::Persistence(format!("{} does not exist", path.display())))?;

        let count = snapshot.memory.len();
        self.restore(snapshot);
        self.persist();
        info!("Memory imported from {} ({} entries)", path.display(), count);
        Ok(count)
    }

    /// Markdown summary of the session
    pub fn context_summary(&self) -> String {
        let stats = self.execution_stats();
        let mut summary = format!(
            "# Context Summary\n\n\
             - Session ID: {}\n\
             - Started: {}\n\
             - Total Interactions: {}\n\
             - Average Confidence: {:.2}\n\
             - Shared State Keys: {}\n\
             - Tracked Patterns: {}\n\n\
             ## Recent Interactions\n",
            self.session_id,
            self.started_at.to_rfc3339(),
            stats.count,
            stats.avg_confidence,
            self.shared_state.keys().join(", "),
            self.pattern_stats.keys().cloned().collect::<Vec<_>>().join(", "),
        );

        for entry in self.recent(5) {
            let preview: String = entry.input_prompt.chars().take(50).collect();
            summary.push_str(&format!(
                "- {}: {}... (confidence: {:.2})\n",
                entry.agent_name, preview, entry.confidence
            ));
        }

        summary
    }

    fn restore(&mut self, snapshot: StoreSnapshot) {
        self.entries.extend(snapshot.memory);
        self.evict();
        self.pattern_stats.extend(snapshot.patterns);
        self.shared_state.merge(&snapshot.shared_state.0);
    }

    fn evict(&mut self) {
        while self.entries.len() > self.config.memory_cap {
            if let Some(evicted) = self.entries.pop_front() {
                debug!("Evicted memory entry from {}", evicted.timestamp);
            }
        }
    }

    fn persist(&self) {
        let Some(backend) = &self.backend else {
            return;
        };

        if let Err(e) = backend.save(&self.snapshot()) {
            warn!(
                error = %FusionError::Persistence(e.to_string()),
                "Failed to write {}",
                backend.describe()
            );
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(agent: &str, prompt: &str, confidence: f64) -> MemoryEntry {
        MemoryEntry::new(agent, prompt, json!({"output": format!("{} out", prompt)}), confidence)
    }

    #[test]
    fn test_execution_stats_empty() {
        let store = ContextStore::default();
        let stats = store.execution_stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.avg_confidence, 0.0);
        assert_eq!(stats.avg_execution_time, Duration::ZERO);
    }

    #[test]
    fn test_execution_stats_means() {
        let mut store = ContextStore::default();
        store.store_interaction(entry("a", "one", 0.5).with_execution_time(Duration::from_millis(100)));
        store.store_interaction(entry("b", "two", 1.0).with_execution_time(Duration::from_millis(300)));

        let stats = store.execution_stats();
        assert_eq!(stats.count, 2);
        assert!((stats.avg_confidence - 0.75).abs() < 1e-9);
        assert_eq!(stats.avg_execution_time, Duration::from_millis(200));
    }

    #[test]
    fn test_fifo_eviction() {
        let mut store = ContextStore::new(ContextConfig {
            memory_cap: 100,
            ..Default::default()
        });

        for i in 0..101 {
            store.store_interaction(entry("agent", &format!("prompt {}", i), 0.8));
        }

        assert_eq!(store.len(), 100);
        assert_eq!(store.entries().next().unwrap().input_prompt, "prompt 1");
        assert_eq!(store.entries().last().unwrap().input_prompt, "prompt 100");
    }

    #[test]
    fn test_relevant_memory_ranking() {
        let mut store = ContextStore::default();
        store.store_interaction(entry("a", "design a login form", 0.8));
        store.store_interaction(entry("b", "evaluate the checkout", 0.8));
        store.store_interaction(entry("c", "design the login page", 0.8));
        store.store_interaction(entry("d", "design review", 0.8));

        let results = store.relevant_memory("design login", 10);
        assert_eq!(results.len(), 3);
        // Two full matches, most recent first, then the partial match
        assert_eq!(results[0].agent_name, "c");
        assert_eq!(results[1].agent_name, "a");
        assert_eq!(results[2].agent_name, "d");

        let limited = store.relevant_memory("design login", 1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_relevant_memory_empty_store() {
        let store = ContextStore::default();
        assert!(store.relevant_memory("anything", 5).is_empty());
    }

    #[test]
    fn test_relevant_memory_min_relevance() {
        let mut store = ContextStore::default();
        store.store_interaction(entry("a", "alpha", 0.8));

        // 1 of 11 query words overlaps: below 0.1
        let query = "alpha b c d e f g h i j k";
        assert!(store.relevant_memory(query, 5).is_empty());
        assert_eq!(store.relevant_memory("alpha b", 5).len(), 1);
    }

    #[test]
    fn test_shared_state_last_writer_wins() {
        let mut store = ContextStore::default();
        store.set_shared_state("prompt_type", json!("design"));
        store.set_shared_state("prompt_type", json!("strategy"));

        assert_eq!(store.get_shared_state("prompt_type", json!(null)), json!("strategy"));
        assert_eq!(store.get_shared_state("missing", json!(42)), json!(42));
    }

    #[test]
    fn test_pattern_stats_from_entries() {
        let mut store = ContextStore::default();
        store.store_interaction(entry("vp_design", "x", 0.9).with_pattern(Some("ux_audit".into())));
        store.store_interaction(entry("vp_design", "y", 0.5).with_pattern(Some("ux_audit".into())));

        let stats = store.pattern_stats("ux_audit").unwrap();
        assert_eq!(stats.usage_count, 2);
        assert_eq!(stats.success_count, 1);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_clamped() {
        let e = MemoryEntry::new("a", "p", json!({}), 1.7);
        assert_eq!(e.confidence, 1.0);
        let e = MemoryEntry::new("a", "p", json!({}), f64::NAN);
        assert_eq!(e.confidence, 0.0);
    }

    #[test]
    fn test_clear_resets_session() {
        let mut store = ContextStore::default();
        store.store_interaction(entry("a", "p", 0.8).with_pattern(Some("p1".into())));
        store.set_shared_state("k", json!(1));

        store.clear();
        assert!(store.is_empty());
        assert!(store.shared_state().is_empty());
        assert!(store.all_pattern_stats().is_empty());
    }

    #[test]
    fn test_context_summary_lists_recent() {
        let mut store = ContextStore::default();
        store.store_interaction(entry("evaluator", "score the onboarding flow", 0.9));

        let summary = store.context_summary();
        assert!(summary.contains("Total Interactions: 1"));
        assert!(summary.contains("evaluator: score the onboarding flow"));
    }
}
