// src/scene_io.rs
//
// File plumbing around the core: scene log discovery and parsing, and
// writing of classification reports and calibration results.
//
// Scene log (JSON):
//   {
//     "scene_name": "scene-0061",
//     "scene_token": "...",                       (optional)
//     "channels": { "<name>": [ {"timestamp": µs, "payload": {"kind": ...}} ] },
//     "samples":  [ {"sample_token": "...", "timestamp": µs} ]
//   }

use crate::calibration::CalibrationOutcome;
use crate::classification::{FrameQuery, SceneClassification};
use crate::signals::ChannelStore;
use crate::types::{Sample, SignalPayload};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const REPORT_FILE: &str = "classification_results.json";
pub const SUGGESTED_CONFIG_FILE: &str = "config_suggested.yaml";
pub const DIAGNOSTICS_FILE: &str = "calibration_diagnostics.json";

#[derive(Debug, Deserialize)]
struct SceneLog {
    scene_name: String,
    #[serde(default)]
    scene_token: Option<String>,
    #[serde(default)]
    channels: BTreeMap<String, Vec<Sample<SignalPayload>>>,
    #[serde(default)]
    samples: Vec<FrameQuery>,
}

/// A scene ready for the core.
#[derive(Debug)]
pub struct Scene {
    pub name: String,
    pub token: Option<String>,
    pub store: ChannelStore,
    pub queries: Vec<FrameQuery>,
}

/// Every `*.json` scene log under `dir`, sorted by path.
pub fn find_scene_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        anyhow::bail!("Scene directory {} does not exist", dir.display());
    }

    let mut scenes: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json")))
        .collect();
    scenes.sort();

    info!("Found {} scene log(s) in {}", scenes.len(), dir.display());
    Ok(scenes)
}

pub fn parse_scene(json: &str) -> Result<Scene> {
    let log: SceneLog = serde_json::from_str(json).context("Malformed scene log")?;

    let mut store = ChannelStore::new();
    for (name, samples) in log.channels {
        store
            .insert(name, samples)
            .with_context(|| format!("Scene {}", log.scene_name))?;
    }
    if log.samples.is_empty() {
        warn!("Scene {} has no frames to classify", log.scene_name);
    }

    Ok(Scene {
        name: log.scene_name,
        token: log.scene_token,
        store,
        queries: log.samples,
    })
}

pub fn load_scene(path: impl AsRef<Path>) -> Result<Scene> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scene log {}", path.display()))?;
    parse_scene(&contents).with_context(|| format!("Failed to load {}", path.display()))
}

/// Run directory name, e.g. `20250114_093012`.
pub fn run_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Writes `<run_dir>/<scene_name>/classification_results.json`.
pub fn write_scene_report(run_dir: impl AsRef<Path>, scene: &SceneClassification) -> Result<PathBuf> {
    let scene_dir = run_dir.as_ref().join(&scene.scene_name);
    fs::create_dir_all(&scene_dir)
        .with_context(|| format!("Failed to create {}", scene_dir.display()))?;

    let path = scene_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(scene)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Writes the suggested threshold file and the mixture diagnostics.
pub fn write_calibration(run_dir: impl AsRef<Path>, outcome: &CalibrationOutcome) -> Result<()> {
    let run_dir = run_dir.as_ref();
    fs::create_dir_all(run_dir)
        .with_context(|| format!("Failed to create {}", run_dir.display()))?;

    outcome.thresholds.save(run_dir.join(SUGGESTED_CONFIG_FILE))?;

    let path = run_dir.join(DIAGNOSTICS_FILE);
    let json = serde_json::to_string_pretty(&outcome.diagnostics)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Suggested thresholds saved to {}", run_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::classify_scene;
    use crate::config::ThresholdSet;
    use crate::signals::SyncConfig;
    use crate::types::ScenarioLabel;

    const SCENE: &str = r#"{
        "scene_name": "scene-0061",
        "scene_token": "cc8c0bf57f984915a77078b10eb33198",
        "channels": {
            "pose": [
                {"timestamp": 1000000, "payload": {"kind": "pose", "vel": [0.1, 0.0, 0.0], "rotation_rate": [0.0, 0.0, 0.0]}},
                {"timestamp": 1500000, "payload": {"kind": "pose", "vel": [5.0, 0.0, 0.0], "rotation_rate": [0.0, 0.0, 0.05], "accel": [-2.0, 0.0, 0.0]}}
            ],
            "steeranglefeedback": [
                {"timestamp": 1000000, "payload": {"kind": "steering", "value": 0.0}},
                {"timestamp": 1510000, "payload": {"kind": "steering", "value": 0.01}}
            ]
        },
        "samples": [
            {"sample_token": "s0", "timestamp": 1000000},
            {"sample_token": "s1", "timestamp": 1500000}
        ]
    }"#;

    fn thresholds() -> ThresholdSet {
        ThresholdSet::new(0.5, 11.373, 0.282, 1.013, 4.327, 0.1, 0.5).unwrap()
    }

    #[test]
    fn test_parse_and_classify_scene() {
        let scene = parse_scene(SCENE).unwrap();
        assert_eq!(scene.name, "scene-0061");
        assert_eq!(scene.store.len(), 2);
        assert_eq!(scene.queries.len(), 2);

        let result = classify_scene(
            &scene.name,
            &scene.store,
            &scene.queries,
            &thresholds(),
            SyncConfig::default(),
        );
        let labels: Vec<ScenarioLabel> = result.samples.iter().map(|r| r.scenario).collect();
        assert_eq!(labels, vec![ScenarioLabel::Stop, ScenarioLabel::Deceleration]);
    }

    #[test]
    fn test_unsorted_channel_reports_scene_and_channel() {
        let json = r#"{
            "scene_name": "scene-0100",
            "channels": {
                "steeranglefeedback": [
                    {"timestamp": 20, "payload": {"kind": "steering", "value": 0.0}},
                    {"timestamp": 10, "payload": {"kind": "steering", "value": 0.0}}
                ]
            }
        }"#;
        let err = parse_scene(json).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("scene-0100"));
        assert!(message.contains("steeranglefeedback"));
    }

    #[test]
    fn test_report_written_per_scene() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = parse_scene(SCENE).unwrap();
        scene.queries.truncate(1);
        let mut result = classify_scene(
            &scene.name,
            &scene.store,
            &scene.queries,
            &thresholds(),
            SyncConfig::default(),
        );
        result.scene_token = scene.token.clone();

        let path = write_scene_report(dir.path(), &result).unwrap();
        assert_eq!(path, dir.path().join("scene-0061").join(REPORT_FILE));

        let written: SceneClassification =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.scene_token, scene.token);
        assert_eq!(written.samples.len(), 1);
        assert_eq!(written.samples[0].scenario, ScenarioLabel::Stop);
        assert_eq!(written.samples[0].sample_token.as_deref(), Some("s0"));
    }

    #[test]
    fn test_find_scene_files_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.json"), SCENE).unwrap();
        fs::write(dir.path().join("nested").join("a.JSON"), SCENE).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = find_scene_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(find_scene_files(dir.path().join("missing")).is_err());
    }
}
