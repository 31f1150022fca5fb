//! Configuration for the vantage pipeline.
//!
//! Loaded from a YAML file; every section has defaults carrying the
//! reference thresholds, so a partial file is valid. The config is passed
//! down explicitly: no ambient globals.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub detection: DetectionConfig,
    pub runtime: RuntimeConfig,
    pub dispatch: DispatchConfig,
    pub notify: NotifyConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Sanity-check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.scopes.is_empty() {
            return Err(Error::config("runtime.scopes must name at least one scope"));
        }
        if self.detection.anomaly.zscore_threshold <= 0.0 {
            return Err(Error::config("anomaly.zscore_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&self.detection.trend.min_r_squared) {
            return Err(Error::config("trend.min_r_squared must be in [0, 1]"));
        }
        Ok(())
    }
}

/// Finding store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/vantage.sqlite"),
        }
    }
}

/// Detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub anomaly: AnomalyConfig,
    pub opportunity: OpportunityConfig,
    pub trend: TrendConfig,
    pub diagnosis: DiagnosisConfig,
    /// Bounded recent window queried per run, in days.
    pub window_days: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            anomaly: AnomalyConfig::default(),
            opportunity: OpportunityConfig::default(),
            trend: TrendConfig::default(),
            diagnosis: DiagnosisConfig::default(),
            window_days: 7,
        }
    }
}

/// Risk detection via level/ratio test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Two-sided z-score threshold.
    pub zscore_threshold: f64,
    /// Absolute percent-change floor.
    pub pct_change_floor: f64,
    /// Percent-change magnitude at which severity escalates to high
    /// (twice the base floor by default).
    pub high_severity_floor: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: 2.5,
            pct_change_floor: 20.0,
            high_severity_floor: 40.0,
        }
    }
}

/// Opportunity detection via visibility-without-conversion test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunityConfig {
    /// Exposure rise (percent) that counts as "sharp".
    pub impressions_rise_pct: f64,
    /// Near-miss ranking band, inclusive.
    pub near_miss_position_min: f64,
    pub near_miss_position_max: f64,
    /// Minimum exposure volume for near-miss findings.
    pub impressions_floor: f64,
}

impl Default for OpportunityConfig {
    fn default() -> Self {
        Self {
            impressions_rise_pct: 50.0,
            near_miss_position_min: 11.0,
            near_miss_position_max: 20.0,
            impressions_floor: 100.0,
        }
    }
}

/// Trend detection via regression fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Minimum fit quality.
    pub min_r_squared: f64,
    /// Maximum slope p-value.
    pub max_p_value: f64,
    /// Minimum points in the fitted series.
    pub min_points: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_r_squared: 0.7,
            max_p_value: 0.05,
            min_points: 5,
        }
    }
}

/// Diagnosis hypothesis thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisConfig {
    /// Position worsening (WoW) that confirms a ranking regression.
    pub position_drop_threshold: f64,
    /// Relative CTR drop (percent) that confirms an engagement regression.
    pub ctr_drop_threshold: f64,
    /// Content modified within this many days counts as a recent mutation.
    pub content_mutation_days: i64,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            position_drop_threshold: 10.0,
            ctr_drop_threshold: 30.0,
            content_mutation_days: 7,
        }
    }
}

/// Agent runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scopes the watcher runs detectors over.
    pub scopes: Vec<String>,
    /// Seconds between watcher detector runs.
    pub watcher_interval_secs: u64,
    /// Consecutive errors before an agent fails terminally.
    pub max_consecutive_errors: u32,
    /// Base backoff after an agent error, in milliseconds.
    pub error_backoff_ms: u64,
    /// Event bus channel capacity.
    pub bus_capacity: usize,
    /// Strategist prioritization weights.
    pub strategist: StrategistConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scopes: vec!["default".to_string()],
            watcher_interval_secs: 3_600,
            max_consecutive_errors: 5,
            error_backoff_ms: 1_000,
            bus_capacity: 1_024,
            strategist: StrategistConfig::default(),
        }
    }
}

/// Strategist prioritization weights.
///
/// The additive outcome feedback constants are tunable configuration, not a
/// calibrated statistical model; weights are clamped so feedback cannot run
/// away.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategistConfig {
    /// Per-cause priority multiplier.
    pub cause_weights: HashMap<String, f64>,
    /// Additive weight boost when an outcome target is achieved.
    pub outcome_boost: f64,
    /// Additive weight decay when an outcome target is missed.
    pub outcome_decay: f64,
    /// Clamp band for adjusted weights.
    pub weight_min: f64,
    pub weight_max: f64,
}

impl Default for StrategistConfig {
    fn default() -> Self {
        Self {
            cause_weights: HashMap::from([
                ("ranking regression".to_string(), 1.5),
                ("engagement regression".to_string(), 1.2),
                ("recent content mutation".to_string(), 1.0),
                ("undetermined".to_string(), 0.5),
            ]),
            outcome_boost: 0.1,
            outcome_decay: 0.1,
            weight_min: 0.25,
            weight_max: 4.0,
        }
    }
}

/// Dispatcher and outcome monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bounded timeout for each external call, in seconds.
    pub call_timeout_secs: u64,
    /// Retry policy for execution attempts.
    pub retry: RetryPolicy,
    /// Outcome monitoring duration in days (clamped 7–30).
    pub outcome_duration_days: u32,
    /// Hours between outcome collections.
    pub outcome_interval_hours: u32,
    /// Seconds between dispatcher polls for approved recommendations.
    pub poll_interval_secs: u64,
    /// Default improvement goal per monitored metric, percent.
    pub outcome_target_pct: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            retry: RetryPolicy::default(),
            outcome_duration_days: 14,
            outcome_interval_hours: 24,
            poll_interval_secs: 60,
            outcome_target_pct: 10.0,
        }
    }
}

/// Notification routing: `category × severity → channel names`, fully
/// data-driven and overridable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Keys are `"category/severity"` (e.g. `"risk/high"`); values are
    /// channel names registered with the router.
    pub routes: HashMap<String, Vec<String>>,
    /// Retry policy for sends.
    pub retry: RetryPolicy,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            routes: HashMap::from([
                ("risk/high".to_string(), vec!["log".to_string()]),
                ("risk/medium".to_string(), vec!["log".to_string()]),
                ("recommendation/high".to_string(), vec!["log".to_string()]),
            ]),
            retry: RetryPolicy::default(),
        }
    }
}

/// HTTP API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8686,
            request_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_carry_reference_thresholds() {
        let config = Config::default();
        assert_eq!(config.detection.anomaly.zscore_threshold, 2.5);
        assert_eq!(config.detection.anomaly.pct_change_floor, 20.0);
        assert_eq!(config.detection.anomaly.high_severity_floor, 40.0);
        assert_eq!(config.detection.trend.min_r_squared, 0.7);
        assert_eq!(config.detection.trend.max_p_value, 0.05);
        assert_eq!(config.dispatch.retry.max_attempts, 4);
        assert_eq!(config.dispatch.retry.initial_delay_ms, 1_000);
    }

    #[test]
    fn partial_yaml_overrides_merge_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "detection:\n  anomaly:\n    zscore_threshold: 3.0\nruntime:\n  scopes: [\"sc-domain:example.com\"]"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.detection.anomaly.zscore_threshold, 3.0);
        // untouched sections keep defaults
        assert_eq!(config.detection.anomaly.pct_change_floor, 20.0);
        assert_eq!(config.runtime.scopes, vec!["sc-domain:example.com"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_scopes() {
        let mut config = Config::default();
        config.runtime.scopes.clear();
        assert!(config.validate().is_err());
    }
}
