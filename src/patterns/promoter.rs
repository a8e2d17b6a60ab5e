//! Pattern Promoter
//!
//! Scans the interaction log for runs whose quality score clears a very high
//! bar and registers each as a literal prompt/output template. The promoted
//! pattern triggers on the source prompt's significant words and replays the
//! captured output as an exemplar appended to the prompt.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::registry::{Pattern, PatternRegistry, PatternType, PromotedTemplate};
use crate::memory::MemoryEntry;

/// Default promotion bar
pub const DEFAULT_PROMOTION_THRESHOLD: f64 = 0.95;

/// Shorter words ("the", "a", "on") would substring-match almost any prompt
const MIN_TRIGGER_LEN: usize = 4;

/// A run that cleared the promotion bar
#[derive(Debug, Clone, PartialEq)]
pub struct QualityRun {
    pub prompt: String,
    pub agent: String,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Memory quality overview
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub total_runs: usize,
    pub promotable_runs: usize,
    pub avg_score: f64,
    pub promotion_rate: f64,
    pub high_quality_runs: Vec<QualityRun>,
}

pub struct PatternPromoter {
    threshold: f64,
}

impl PatternPromoter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Register a pattern for every qualifying entry; returns the patterns registered
    pub fn promote_from_memory<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a MemoryEntry>,
        registry: &mut PatternRegistry,
    ) -> Vec<Pattern> {
        let mut promoted: Vec<Pattern> = Vec::new();

        for entry in entries {
            let Some(pattern) = self.promote_entry(entry) else {
                continue;
            };

            registry.register(&pattern.name.clone(), pattern.clone());
            match promoted.iter_mut().find(|p| p.name == pattern.name) {
                Some(existing) => *existing = pattern,
                None => promoted.push(pattern),
            }
        }

        if !promoted.is_empty() {
            info!("Promoted {} patterns from memory", promoted.len());
        }
        promoted
    }

    /// Totals, average score and the runs above the bar
    pub fn analyze_memory_quality<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a MemoryEntry>,
    ) -> QualityReport {
        let mut report = QualityReport::default();
        let mut total_score = 0.0;

        for entry in entries {
            let score = entry.quality_score();
            report.total_runs += 1;
            total_score += score;

            if score >= self.threshold {
                report.promotable_runs += 1;
                report.high_quality_runs.push(QualityRun {
                    prompt: entry.input_prompt.clone(),
                    agent: entry.agent_name.clone(),
                    score,
                    timestamp: entry.timestamp,
                });
            }
        }

        if report.total_runs > 0 {
            report.avg_score = total_score / report.total_runs as f64;
            report.promotion_rate = report.promotable_runs as f64 / report.total_runs as f64;
        }
        report
    }

    fn promote_entry(&self, entry: &MemoryEntry) -> Option<Pattern> {
        if entry.is_failure() {
            return None;
        }

        let score = entry.quality_score();
        if score < self.threshold {
            return None;
        }

        let prompt = entry.input_prompt.trim();
        let output = entry.output_text().trim();
        if prompt.is_empty() || output.is_empty() {
            debug!("Skipping promotable entry from {} with empty text", entry.agent_name);
            return None;
        }

        let mut pattern = Pattern::new(&promoted_name(prompt), PatternType::PromptEnhancement, &entry.agent_name)
            .with_threshold(self.threshold)
            .with_enhancement(&format!("Reference answer for a similar request:\n\n{}", output))
            .with_category("promoted", &["auto"]);
        pattern.triggers = trigger_words(prompt);
        pattern.promoted = Some(PromotedTemplate {
            source_prompt: prompt.to_string(),
            output: output.to_string(),
            score,
            promoted_at: Utc::now(),
        });

        Some(pattern)
    }
}

impl Default for PatternPromoter {
    fn default() -> Self {
        Self::new(DEFAULT_PROMOTION_THRESHOLD)
    }
}

/// Stable name from the source prompt, so re-promotion updates in place
fn promoted_name(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.to_lowercase().as_bytes());
    format!("auto_promoted_{}", &hex::encode(digest)[..8])
}

/// Distinct lowercased words long enough to carry meaning, in prompt order
fn trigger_words(prompt: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in prompt
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TRIGGER_LEN)
    {
        if !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}
