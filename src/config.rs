//! Configuration management

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::OrchestratorConfig;
use crate::memory::ContextConfig;
use crate::patterns::promoter::DEFAULT_PROMOTION_THRESHOLD;
use crate::patterns::registry::DEFAULT_PATTERN;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON store for memory, pattern stats and shared state
    pub store_path: PathBuf,

    /// Agent scorecard (built-in table when unset)
    pub scorecard_path: Option<PathBuf>,

    /// Pattern library loaded at startup and written after `route` and `promote`
    pub pattern_library: PathBuf,

    /// Retained memory entries
    pub memory_cap: usize,

    /// Primary confidence below which fallback patterns run
    pub fallback_confidence: f64,

    /// Quality score required for pattern promotion
    pub promotion_threshold: f64,

    /// Pattern used when nothing matches
    pub default_pattern: String,

    /// Agent sequence for `pipeline`
    pub pipeline: Vec<String>,

    /// Per-agent time limit
    pub agent_timeout: Option<Duration>,

    /// Emit JSON logs
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fusion");

        let store_path = var("FUSION_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("memory.json"));

        let scorecard_path = var("FUSION_SCORECARD_PATH").map(PathBuf::from);
        let pattern_library = var("FUSION_PATTERN_LIBRARY")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("patterns.json"));

        let memory_cap = var("FUSION_MEMORY_CAP")
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::memory::DEFAULT_MEMORY_CAP);

        let fallback_confidence = var("FUSION_FALLBACK_CONFIDENCE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.8);

        let promotion_threshold = var("FUSION_PROMOTION_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PROMOTION_THRESHOLD);

        let default_pattern = var("FUSION_DEFAULT_PATTERN").unwrap_or_else(|| DEFAULT_PATTERN.to_string());

        let pipeline = var("FUSION_PIPELINE")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "vp_design".to_string(),
                    "creative_director".to_string(),
                    "evaluator".to_string(),
                ]
            });

        let agent_timeout = var("FUSION_AGENT_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs);

        let log_json = var("FUSION_LOG_JSON")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        for (name, value) in [
            ("FUSION_FALLBACK_CONFIDENCE", fallback_confidence),
            ("FUSION_PROMOTION_THRESHOLD", promotion_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if memory_cap == 0 {
            bail!("FUSION_MEMORY_CAP must be positive");
        }

        Ok(Self {
            store_path,
            scorecard_path,
            pattern_library,
            memory_cap,
            fallback_confidence,
            promotion_threshold,
            default_pattern,
            pipeline,
            agent_timeout,
            log_json,
        })
    }

    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            memory_cap: self.memory_cap,
            ..Default::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            fallback_confidence: self.fallback_confidence,
            agent_timeout: self.agent_timeout,
            ..Default::default()
        }
    }
}
