// src/config.rs
//
// Threshold and run configuration. A ThresholdSet is validated once when it
// is built and is read-only afterwards.

use crate::calibration::CalibrationPolicy;
use crate::error::{Result as CoreResult, ScenarioError};
use crate::signals::SyncConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Named decision cutoffs consumed by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds")]
pub struct ThresholdSet {
    stop_speed: f64,
    pull_over_speed: f64,
    lane_change_steering: f64,
    turn_steering: f64,
    u_turn_steering: f64,
    yaw_rate: f64,
    turn_signal_on: f64,
}

/// Unvalidated form; accepts both the short key names and the older
/// `*_threshold` spellings.
#[derive(Debug, Deserialize)]
struct RawThresholds {
    #[serde(alias = "stop_speed_threshold")]
    stop_speed: Option<f64>,
    #[serde(alias = "pull_over_speed_threshold")]
    pull_over_speed: Option<f64>,
    #[serde(alias = "lane_change_steering_threshold")]
    lane_change_steering: Option<f64>,
    #[serde(alias = "turn_steering_threshold")]
    turn_steering: Option<f64>,
    #[serde(alias = "u_turn_steering_threshold")]
    u_turn_steering: Option<f64>,
    #[serde(alias = "yaw_rate_threshold")]
    yaw_rate: Option<f64>,
    #[serde(alias = "turn_signal_on_threshold")]
    turn_signal_on: Option<f64>,
}

impl TryFrom<RawThresholds> for ThresholdSet {
    type Error = ScenarioError;

    fn try_from(raw: RawThresholds) -> CoreResult<Self> {
        fn required(key: &str, value: Option<f64>) -> CoreResult<f64> {
            value.ok_or_else(|| ScenarioError::configuration(key, "required key is missing"))
        }

        ThresholdSet::new(
            required("stop_speed", raw.stop_speed)?,
            required("pull_over_speed", raw.pull_over_speed)?,
            required("lane_change_steering", raw.lane_change_steering)?,
            required("turn_steering", raw.turn_steering)?,
            required("u_turn_steering", raw.u_turn_steering)?,
            required("yaw_rate", raw.yaw_rate)?,
            required("turn_signal_on", raw.turn_signal_on)?,
        )
    }
}

impl ThresholdSet {
    pub const KEYS: [&'static str; 7] = [
        "stop_speed",
        "pull_over_speed",
        "lane_change_steering",
        "turn_steering",
        "u_turn_steering",
        "yaw_rate",
        "turn_signal_on",
    ];

    pub fn new(
        stop_speed: f64,
        pull_over_speed: f64,
        lane_change_steering: f64,
        turn_steering: f64,
        u_turn_steering: f64,
        yaw_rate: f64,
        turn_signal_on: f64,
    ) -> CoreResult<Self> {
        let set = Self {
            stop_speed,
            pull_over_speed,
            lane_change_steering,
            turn_steering,
            u_turn_steering,
            yaw_rate,
            turn_signal_on,
        };
        set.validate()?;
        Ok(set)
    }

    /// Build from a flat key → value map. Unknown keys are ignored.
    pub fn from_map(values: &HashMap<String, f64>) -> CoreResult<Self> {
        let get = |key: &str| {
            values
                .get(key)
                .copied()
                .ok_or_else(|| ScenarioError::configuration(key, "required key is missing"))
        };
        Self::new(
            get("stop_speed")?,
            get("pull_over_speed")?,
            get("lane_change_steering")?,
            get("turn_steering")?,
            get("u_turn_steering")?,
            get("yaw_rate")?,
            get("turn_signal_on")?,
        )
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        Self::KEYS
            .iter()
            .zip(self.values())
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn values(&self) -> [f64; 7] {
        [
            self.stop_speed,
            self.pull_over_speed,
            self.lane_change_steering,
            self.turn_steering,
            self.u_turn_steering,
            self.yaw_rate,
            self.turn_signal_on,
        ]
    }

    fn validate(&self) -> CoreResult<()> {
        for (key, value) in Self::KEYS.iter().zip(self.values()) {
            if !value.is_finite() {
                return Err(ScenarioError::configuration(
                    *key,
                    format!("value must be finite, got {value}"),
                ));
            }
        }

        if self.lane_change_steering > self.turn_steering {
            return Err(ScenarioError::configuration(
                "lane_change_steering",
                format!(
                    "must not exceed turn_steering ({} > {})",
                    self.lane_change_steering, self.turn_steering
                ),
            ));
        }
        if self.turn_steering > self.u_turn_steering {
            return Err(ScenarioError::configuration(
                "turn_steering",
                format!(
                    "must not exceed u_turn_steering ({} > {})",
                    self.turn_steering, self.u_turn_steering
                ),
            ));
        }
        Ok(())
    }

    pub fn stop_speed(&self) -> f64 {
        self.stop_speed
    }

    pub fn pull_over_speed(&self) -> f64 {
        self.pull_over_speed
    }

    pub fn lane_change_steering(&self) -> f64 {
        self.lane_change_steering
    }

    pub fn turn_steering(&self) -> f64 {
        self.turn_steering
    }

    pub fn u_turn_steering(&self) -> f64 {
        self.u_turn_steering
    }

    pub fn yaw_rate(&self) -> f64 {
        self.yaw_rate
    }

    pub fn turn_signal_on(&self) -> f64 {
        self.turn_signal_on
    }
}

/// On-disk threshold file: `thresholds: { ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsFile {
    pub thresholds: ThresholdSet,
}

impl ThresholdSet {
    /// Load from a YAML (or JSON, which is valid YAML) file with a top-level
    /// `thresholds` mapping.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read thresholds from {}", path.display()))?;
        let file: ThresholdsFile = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid thresholds in {}", path.display()))?;
        Ok(file.thresholds)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = serde_yaml::to_string(&ThresholdsFile { thresholds: *self })?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write thresholds to {}", path.display()))?;
        Ok(())
    }
}

// ============================================================================
// RUN CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Required for `classify`, ignored by `calibrate`.
    #[serde(default)]
    pub thresholds: Option<ThresholdSet>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub calibration: CalibrationPolicy,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    pub input_dir: String,
    pub output_dir: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_dir: "scenes".to_string(),
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn require_thresholds(&self) -> CoreResult<ThresholdSet> {
        self.thresholds
            .ok_or_else(|| ScenarioError::configuration("thresholds", "section is missing"))
    }
}
