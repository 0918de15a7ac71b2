//! tilewatchd - tile-scanning detection daemon
//!
//! This daemon:
//! 1. Loads configuration (`TILEWATCH_CONFIG` file + `TILEWATCH_*` overrides)
//! 2. Opens the camera, classifier, reaction pipeline and thermal governor
//! 3. Scans the frame one tile per tick, reacting to qualifying detections
//! 4. Stops on Ctrl-C or when the tick budget is spent

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tilewatch::{CancelToken, ClassifierKind, DetectionLoop, TilewatchConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "TILEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many ticks (0 runs until Ctrl-C).
    #[arg(long)]
    budget: Option<u64>,
    /// Number of frames to discard before scanning.
    #[arg(long)]
    warm_up: Option<u32>,
    /// Capture and tile without classifying.
    #[arg(long)]
    no_detect: bool,
    /// Arm (true) or disarm (false) the deterrent.
    #[arg(long)]
    deter: Option<bool>,
    /// Classifier backend (stub, remote, remote_detector, tract).
    #[arg(long)]
    backend: Option<ClassifierKind>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = TilewatchConfig::load_from(args.config.as_deref())?;
    if let Some(budget) = args.budget {
        cfg.scan.frame_budget = budget;
    }
    if let Some(warm_up) = args.warm_up {
        cfg.scan.warm_up_frames = warm_up;
    }
    if args.no_detect {
        cfg.scan.auto_detect = false;
    }
    if let Some(deter) = args.deter {
        cfg.reaction.deter = deter;
    }
    if let Some(backend) = args.backend {
        cfg.model.backend = backend;
    }
    cfg.validate().context("invalid configuration after command-line overrides")?;

    log::info!(
        "tilewatchd {} starting: camera {} ({}x{}), backend {}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.source,
        cfg.camera.width,
        cfg.camera.height,
        cfg.model.backend
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, finishing current tick...");
        handler_token.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    let mut detection_loop = DetectionLoop::from_config(&cfg)?.with_cancel_token(cancel);
    let stats = detection_loop.run()?;

    log::info!(
        "tilewatchd stopped after {} ticks: {} frames, {} classifications, {} detections, {} deterrent activations",
        stats.ticks,
        stats.frames_captured,
        stats.classifications,
        stats.detections,
        stats.reactions
    );
    Ok(())
}
