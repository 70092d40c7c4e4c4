// src/main.rs

use anyhow::Result;
use canbus_scenario::batch;
use canbus_scenario::scene_io;
use canbus_scenario::AppConfig;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Scenario classification over vehicle CAN bus logs
#[derive(Parser, Debug)]
#[command(name = "canbus-scenario")]
#[command(version, about = "Scenario classification and threshold calibration over CAN bus logs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify every scene log under io.input_dir
    Classify {
        /// Run configuration
        #[arg(default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Fit thresholds from every scene log under io.input_dir
    Calibrate {
        /// Run configuration
        #[arg(default_value = "config.yaml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match &cli.command {
        Commands::Classify { config } | Commands::Calibrate { config } => config.clone(),
    };

    let config = AppConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("🚗 CAN-bus Scenario Classifier Starting");
    info!("✓ Configuration loaded from {}", config_path.display());

    let scene_files = scene_io::find_scene_files(&config.io.input_dir)?;
    if scene_files.is_empty() {
        error!("No scene logs found in {}", config.io.input_dir);
        return Ok(());
    }

    let run_dir = Path::new(&config.io.output_dir).join(scene_io::run_id());

    match cli.command {
        Commands::Classify { .. } => run_classify(&config, &scene_files, &run_dir),
        Commands::Calibrate { .. } => {
            batch::calibrate_corpus(&config, &scene_files, &run_dir)?;
            Ok(())
        }
    }
}

fn run_classify(config: &AppConfig, scene_files: &[PathBuf], run_dir: &Path) -> Result<()> {
    let run = batch::classify_corpus(config, scene_files, run_dir)?;
    let total = &run.metrics;

    info!("\n========================================");
    info!("✓ Classified {} frame(s)", total.total_frames);
    info!("  Labels: {}", total.summary());
    for (field, n) in &total.absent_fields {
        info!("  Absent {}: {} frame(s)", field, n);
    }
    for (channel, n) in &total.missing_channels {
        info!("  No '{}' sample in tolerance: {} frame(s)", channel, n);
    }
    info!(
        "  Sync: {} cursor queries, {} seeks",
        total.sync.cursor_queries, total.sync.seeks
    );
    info!("  Processing Speed: {:.1} FPS", total.fps());
    if run.failed > 0 {
        warn!("  ⚠️  {} scene(s) failed", run.failed);
    }
    info!("========================================");

    Ok(())
}
