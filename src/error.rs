// src/error.rs
//
// Core error type. Everything here is fatal to the operation that raised it;
// missing samples inside the tolerance window are NOT errors (see VehicleState).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScenarioError>;

#[derive(Debug, Error)]
pub enum ScenarioError {
    /// A channel's timestamps go backwards.
    #[error(
        "data integrity error in channel '{channel}': sample {index} has timestamp {timestamp} < previous {previous}"
    )]
    DataIntegrity {
        channel: String,
        index: usize,
        previous: i64,
        timestamp: i64,
    },

    /// Missing or invalid threshold / configuration value.
    #[error("configuration error for '{key}': {reason}")]
    Configuration { key: String, reason: String },

    /// Mixture fitting or boundary derivation failed.
    #[error("calibration error for signal '{signal}': {reason}")]
    Calibration { signal: String, reason: String },
}

impl ScenarioError {
    pub fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn calibration(signal: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Calibration {
            signal: signal.into(),
            reason: reason.into(),
        }
    }
}
