// src/batch.rs
//
// Corpus-wide runs behind the `classify` and `calibrate` commands.

use crate::calibration::{CalibrationOutcome, Calibrator, CorpusObservations};
use crate::classification::{classify_scene, ClassificationMetrics};
use crate::config::AppConfig;
use crate::scene_io::{self, Scene};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Outcome of classifying every scene of a corpus.
#[derive(Debug, Default)]
pub struct ClassifyRun {
    pub metrics: ClassificationMetrics,
    pub reports: Vec<PathBuf>,
    /// Scenes that could not be loaded or written.
    pub failed: usize,
}

/// Classify each scene log and write its report under `run_dir`. A scene that
/// fails is logged and skipped; the run fails only when every scene does.
pub fn classify_corpus(config: &AppConfig, scene_files: &[PathBuf], run_dir: &Path) -> Result<ClassifyRun> {
    let thresholds = config.require_thresholds()?;
    let mut run = ClassifyRun::default();

    for (idx, path) in scene_files.iter().enumerate() {
        info!(
            "Processing scene {}/{}: {}",
            idx + 1,
            scene_files.len(),
            path.display()
        );

        let Scene {
            name,
            token,
            store,
            queries,
        } = match scene_io::load_scene(path) {
            Ok(scene) => scene,
            Err(e) => {
                error!("Failed to load scene: {:#}", e);
                run.failed += 1;
                continue;
            }
        };

        let mut result = classify_scene(&name, &store, &queries, &thresholds, config.sync);
        result.scene_token = token;
        if let Some(metrics) = &result.metrics {
            run.metrics.merge(metrics);
        }

        match scene_io::write_scene_report(run_dir, &result) {
            Ok(report) => {
                info!("  ✓ Results saved to {}", report.display());
                run.reports.push(report);
            }
            Err(e) => {
                error!("Failed to write results for {}: {:#}", name, e);
                run.failed += 1;
            }
        }
    }

    if !scene_files.is_empty() && run.failed == scene_files.len() {
        bail!("All {} scene(s) failed", scene_files.len());
    }
    Ok(run)
}

/// Pool every scene into one corpus, calibrate, and write the suggested
/// thresholds and diagnostics under `run_dir`. Any unreadable scene aborts
/// the run so thresholds never come from a partial corpus.
pub fn calibrate_corpus(
    config: &AppConfig,
    scene_files: &[PathBuf],
    run_dir: &Path,
) -> Result<CalibrationOutcome> {
    let mut corpus = CorpusObservations::default();
    for path in scene_files {
        let scene = scene_io::load_scene(path).context("Calibration corpus is incomplete")?;
        corpus.add_scene(&scene.store);
    }

    let outcome = Calibrator::new(config.calibration.clone()).calibrate(&corpus)?;
    scene_io::write_calibration(run_dir, &outcome)?;
    Ok(outcome)
}
