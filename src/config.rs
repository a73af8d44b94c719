//! Tunable configuration for the companion core
//!
//! Every threshold the heuristics use lives here so deployments can adjust
//! them from a JSON file without touching the scoring code.

use crate::error::{CompanionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CompanionConfig {
    pub nudge: NudgeConfig,
    pub persona: PersonaConfig,
    pub flow: FlowConfig,
    pub logging: LogConfig,
    pub history: HistoryConfig,
}

impl CompanionConfig {
    /// Load configuration from a JSON file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: CompanionConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let n = &self.nudge;
        if n.queue_capacity == 0 {
            return Err(CompanionError::Config("nudge.queue_capacity must be at least 1".into()));
        }
        if n.min_attempts == 0 || n.min_attempts > n.max_attempts {
            return Err(CompanionError::Config(format!(
                "nudge attempt bounds invalid: {}..={}",
                n.min_attempts, n.max_attempts
            )));
        }
        if !(0.0..=1.0).contains(&n.similarity_threshold) {
            return Err(CompanionError::Config("nudge.similarity_threshold must be within 0..=1".into()));
        }
        if !(0.0..=1.0).contains(&n.ema_alpha) || !(0.0..=1.0).contains(&self.flow.ema_alpha) {
            return Err(CompanionError::Config("ema_alpha must be within 0..=1".into()));
        }

        check_range("nudge.retry_cooldown_minutes", n.retry_cooldown_minutes, 0, MAX_CONFIG_MINUTES)?;
        check_range("nudge.timeouts.immediate", n.timeouts.immediate, 1, MAX_CONFIG_MINUTES)?;
        check_range("nudge.timeouts.high", n.timeouts.high, 1, MAX_CONFIG_MINUTES)?;
        check_range("nudge.timeouts.medium", n.timeouts.medium, 1, MAX_CONFIG_MINUTES)?;
        check_range("nudge.timeouts.low", n.timeouts.low, 1, MAX_CONFIG_MINUTES)?;
        check_range(
            "persona.min_switch_interval_minutes",
            self.persona.min_switch_interval_minutes,
            0,
            MAX_CONFIG_MINUTES,
        )?;
        check_range("logging.retention_days", self.logging.retention_days, 0, MAX_RETENTION_DAYS)?;
        check_range("flow.attempt_threshold", self.flow.attempt_threshold as i64, 1, 10)?;
        Ok(())
    }
}

/// Upper bound for any minute-valued setting (30 days)
pub const MAX_CONFIG_MINUTES: i64 = 60 * 24 * 30;
pub const MAX_RETENTION_DAYS: i64 = 3650;

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(CompanionError::Config(format!(
            "{} must be within {}..={}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

/// Minutes as a duration, clamped to the configurable range so an
/// unvalidated config can never overflow chrono
pub(crate) fn bounded_minutes(minutes: i64) -> chrono::Duration {
    chrono::Duration::minutes(minutes.clamp(0, MAX_CONFIG_MINUTES))
}

pub(crate) fn bounded_days(days: i64) -> chrono::Duration {
    chrono::Duration::days(days.clamp(0, MAX_RETENTION_DAYS))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    pub queue_capacity: usize,
    pub min_attempts: u32,
    pub max_attempts: u32,
    pub retry_cooldown_minutes: i64,
    pub poll_interval_ms: u64,
    /// Jaccard word overlap above which two phrasings count as the same request
    pub similarity_threshold: f64,
    pub ema_alpha: f64,
    pub min_phrasing_chars: usize,
    pub max_phrasing_chars: usize,
    pub timeouts: UrgencyTimeouts,
    /// Estimated handling time per request before any has been processed
    pub default_processing_ms: f64,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            min_attempts: 1,
            max_attempts: 5,
            retry_cooldown_minutes: 15,
            poll_interval_ms: 1000,
            similarity_threshold: 0.8,
            ema_alpha: 0.1,
            min_phrasing_chars: 10,
            max_phrasing_chars: 500,
            timeouts: UrgencyTimeouts::default(),
            default_processing_ms: 5000.0,
        }
    }
}

/// Minutes a request may wait before it expires, per urgency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyTimeouts {
    pub immediate: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl Default for UrgencyTimeouts {
    fn default() -> Self {
        Self {
            immediate: 30,
            high: 120,
            medium: 480,
            low: 1440,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub max_switches_per_session: u32,
    pub min_switch_interval_minutes: i64,
    pub recent_topics_cap: usize,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            max_switches_per_session: 3,
            min_switch_interval_minutes: 5,
            recent_topics_cap: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Minimum confidence for a nudge attempt
    pub attempt_threshold: u8,
    pub ema_alpha: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            attempt_threshold: 6,
            ema_alpha: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub directory: Option<PathBuf>,
    pub retention_days: i64,
    pub echo_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: None,
            retention_days: 7,
            echo_stdout: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HistoryConfig {
    /// SQLite file for bridge attempts; in-memory history when unset
    pub sqlite_path: Option<PathBuf>,
}
