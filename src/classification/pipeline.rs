// src/classification/pipeline.rs
//
// Whole-scene batch: one Synchronizer per scene, one classification per
// query timestamp, results kept in query order.

use super::classifier::classify;
use crate::config::ThresholdSet;
use crate::signals::{ChannelStore, SyncConfig, SyncStats, Synchronizer};
use crate::types::{ClassificationResult, ScenarioLabel, VehicleState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// One output frame to classify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameQuery {
    #[serde(default)]
    pub sample_token: Option<String>,
    pub timestamp: i64,
}

impl FrameQuery {
    pub fn at(timestamp: i64) -> Self {
        Self {
            sample_token: None,
            timestamp,
        }
    }
}

/// Per-scene counters and timing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub total_frames: u64,
    pub frames_per_label: BTreeMap<ScenarioLabel, u64>,
    /// How often each VehicleState field was absent.
    pub absent_fields: BTreeMap<String, u64>,
    /// How often each channel had no sample within tolerance.
    pub missing_channels: BTreeMap<String, u64>,
    pub sync: SyncCounters,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncCounters {
    pub cursor_queries: u64,
    pub seeks: u64,
}

impl From<SyncStats> for SyncCounters {
    fn from(stats: SyncStats) -> Self {
        Self {
            cursor_queries: stats.cursor_queries,
            seeks: stats.seeks,
        }
    }
}

impl ClassificationMetrics {
    pub fn record(&mut self, state: &VehicleState, label: ScenarioLabel) {
        self.total_frames += 1;
        *self.frames_per_label.entry(label).or_insert(0) += 1;
        for field in state.absent_fields() {
            *self.absent_fields.entry(field.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_missing(&mut self, channels: &[&str]) {
        for channel in channels {
            *self.missing_channels.entry(channel.to_string()).or_insert(0) += 1;
        }
    }

    pub fn count(&self, label: ScenarioLabel) -> u64 {
        self.frames_per_label.get(&label).copied().unwrap_or(0)
    }

    pub fn fps(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.total_frames as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    /// Fold another scene's counts into this one.
    pub fn merge(&mut self, other: &ClassificationMetrics) {
        self.total_frames += other.total_frames;
        for (label, n) in &other.frames_per_label {
            *self.frames_per_label.entry(*label).or_insert(0) += n;
        }
        for (field, n) in &other.absent_fields {
            *self.absent_fields.entry(field.clone()).or_insert(0) += n;
        }
        for (channel, n) in &other.missing_channels {
            *self.missing_channels.entry(channel.clone()).or_insert(0) += n;
        }
        self.sync.cursor_queries += other.sync.cursor_queries;
        self.sync.seeks += other.sync.seeks;
        self.elapsed_secs += other.elapsed_secs;
    }

    pub fn summary(&self) -> String {
        self.frames_per_label
            .iter()
            .map(|(label, n)| format!("{}={}", label.as_str(), n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Classified scene, serialized as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneClassification {
    #[serde(default)]
    pub scene_token: Option<String>,
    pub scene_name: String,
    pub samples: Vec<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metrics: Option<ClassificationMetrics>,
}

/// Classify every query of one scene. Queries are normally in
/// non-decreasing time order; out-of-order queries still produce correct
/// results through the synchronizer's binary-search fallback.
pub fn classify_scene(
    scene_name: &str,
    store: &ChannelStore,
    queries: &[FrameQuery],
    thresholds: &ThresholdSet,
    sync_config: SyncConfig,
) -> SceneClassification {
    let started = Instant::now();
    let mut sync = Synchronizer::new(store, sync_config);
    let turn_signal_on = thresholds.turn_signal_on();
    let mut metrics = ClassificationMetrics::default();

    let samples: Vec<ClassificationResult> = queries
        .iter()
        .map(|query| {
            let frame = sync.synchronize(query.timestamp);
            let vehicle_state = frame.to_vehicle_state(turn_signal_on);
            metrics.record_missing(&frame.missing());
            let scenario = classify(&vehicle_state, thresholds);
            metrics.record(&vehicle_state, scenario);
            debug!("[{}] t={} → {}", scene_name, query.timestamp, scenario);
            ClassificationResult {
                sample_token: query.sample_token.clone(),
                timestamp: query.timestamp,
                vehicle_state,
                scenario,
            }
        })
        .collect();

    metrics.sync = sync.stats().into();
    metrics.elapsed_secs = started.elapsed().as_secs_f64();

    info!(
        "🚗 [{}] {} frames from {} channels | {} | seeks={}",
        scene_name,
        metrics.total_frames,
        store.len(),
        metrics.summary(),
        metrics.sync.seeks
    );

    SceneClassification {
        scene_token: None,
        scene_name: scene_name.to_string(),
        samples,
        metrics: Some(metrics),
    }
}

/// Classify pre-built states. Pure per element, so callers may split the
/// slice across threads freely.
pub fn classify_states(states: &[VehicleState], thresholds: &ThresholdSet) -> Vec<ScenarioLabel> {
    states.iter().map(|s| classify(s, thresholds)).collect()
}
