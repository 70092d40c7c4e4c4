// src/classification/mod.rs
//
// VehicleState + ThresholdSet → ScenarioLabel, per frame and per scene.

pub mod classifier;
pub mod pipeline;

pub use classifier::{classify, classify_traced, Rule, CASCADE, HARD_DECELERATION_MPS2};
pub use pipeline::{
    classify_scene, classify_states, ClassificationMetrics, FrameQuery, SceneClassification,
};
