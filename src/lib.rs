// src/lib.rs
//
// Scenario classification over vehicle CAN bus logs.
//
// Signal flow:
//   Corpus of scenes → calibration::Calibrator ─────────→ ThresholdSet
//   Scene channels   → signals::Synchronizer → VehicleState ─┐
//                                              ThresholdSet ─┴→ classifier → ScenarioLabel

pub mod batch;
pub mod calibration;
pub mod classification;
pub mod config;
pub mod error;
pub mod scene_io;
pub mod signals;
pub mod types;

pub use calibration::{CalibrationOutcome, CalibrationPolicy, Calibrator, CorpusObservations};
pub use classification::{classify, classify_scene, FrameQuery, SceneClassification};
pub use config::{AppConfig, ThresholdSet};
pub use error::{Result, ScenarioError};
pub use signals::{ChannelStore, SyncConfig, Synchronizer};
pub use types::{
    ClassificationResult, Gear, Sample, ScenarioLabel, SignalPayload, TurnSignal, VehicleState,
};
