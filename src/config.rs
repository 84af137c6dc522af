//! Configuration for a pilot run.
//!
//! Defaults match the reference deployment; an optional YAML file overrides
//! them, and the oracle API key can come from `WEBPILOT_API_KEY`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub marionette: MarionetteConfig,
    pub budgets: BudgetConfig,
    pub timing: TimingConfig,
    pub ocr: OcrConfig,
    pub recovery: RecoveryConfig,
    pub oracle: OracleConfig,
    pub server: ServerConfig,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            marionette: MarionetteConfig::default(),
            budgets: BudgetConfig::default(),
            timing: TimingConfig::default(),
            ocr: OcrConfig::default(),
            recovery: RecoveryConfig::default(),
            oracle: OracleConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl PilotConfig {
    /// Load configuration, falling back to defaults when no file is given or
    /// the file does not exist. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path)?;
                serde_yaml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("WEBPILOT_API_KEY") {
            if !key.trim().is_empty() {
                self.oracle.api_key = Some(key);
            }
        }
    }
}

/// Where the Marionette server listens (Firefox with `marionette.enabled`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarionetteConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
}

impl Default for MarionetteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2828,
            connect_timeout_secs: 30,
        }
    }
}

/// Hard limits on a single command run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum loop iterations per goal.
    pub max_steps: u32,
    /// Unrecovered failures in a row before the session aborts.
    pub max_consecutive_failures: u32,
    /// Upper bound on elements per DOM snapshot.
    pub max_elements: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: 15,
            max_consecutive_failures: 3,
            max_elements: 200,
        }
    }
}

/// Fixed waits and poll intervals. These are deliberate settle delays rather
/// than readiness signals; they all flow through the executor's single
/// `settle` primitive so a readiness poll could replace them in one place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub page_load_timeout_ms: u64,
    pub ready_poll_interval_ms: u64,
    /// Pause after scrolling an element into view, before clicking.
    pub scroll_settle_ms: u64,
    /// Pause after focusing the search input, before sending Enter.
    pub focus_settle_ms: u64,
    /// Pause after a successful step, before the next observation.
    pub step_settle_ms: u64,
    /// Pause before retrying a not-found target.
    pub recovery_settle_ms: u64,
    /// Pause after submitting a search, letting results load.
    pub search_settle_ms: u64,
    /// Clamp for oracle-requested waits.
    pub max_wait_secs: i64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            page_load_timeout_ms: 10_000,
            ready_poll_interval_ms: 250,
            scroll_settle_ms: 1_000,
            focus_settle_ms: 500,
            step_settle_ms: 1_500,
            recovery_settle_ms: 3_000,
            search_settle_ms: 3_000,
            max_wait_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Minimum confidence (0-100, exclusive) for a text detection to count.
    pub confidence_threshold: i64,
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 60,
            language: "eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Where a first-step search lands when the current page has no search
    /// box.
    pub search_engine: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            search_engine: "https://www.google.com".to_string(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint used as the decision oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.1,
            max_tokens: 150,
            timeout_secs: 60,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// JSON-lines file the observation endpoint appends snapshots to.
    pub snapshot_log: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5001".to_string(),
            snapshot_log: "dom_context.jsonl".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_budgets() {
        let config = PilotConfig::default();
        assert_eq!(config.budgets.max_steps, 15);
        assert_eq!(config.budgets.max_consecutive_failures, 3);
        assert_eq!(config.budgets.max_elements, 200);
        assert_eq!(config.ocr.confidence_threshold, 60);
        assert_eq!(config.marionette.port, 2828);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let raw = "budgets:\n  max_steps: 5\nmarionette:\n  host: remote\n";
        let config: PilotConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.budgets.max_steps, 5);
        assert_eq!(config.budgets.max_consecutive_failures, 3);
        assert_eq!(config.marionette.host, "remote");
        assert_eq!(config.marionette.port, 2828);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = PilotConfig::load(Some(Path::new("/nonexistent/webpilot.yaml"))).unwrap();
        assert_eq!(config.budgets.max_steps, 15);
    }
}
