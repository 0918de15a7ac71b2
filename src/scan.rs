//! The capture, classify, react control loop.
//!
//! One tick looks at one zone. The loop starts in `Phase::Warmup`, discarding
//! frames while the sensor settles, then scans zones round-robin. A full frame
//! is captured only when the cursor wraps to zone 0, so every tile of a sweep
//! comes from the same frame. Each capture is followed by a thermal check that
//! blocks while the device is too hot.
//!
//! Ticks are strictly sequential on the calling thread. Cancellation and the
//! tick budget are checked at the start of every tick.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classify::{build_classifier, Classifier, DetectionResult};
use crate::config::TilewatchConfig;
use crate::frame::FrameTiler;
use crate::ingest::{open_camera, AcquisitionSettings, Camera};
use crate::react::{DeterrentOutcome, ReactionPipeline, ReactionReport};
use crate::thermal::ThermalGovernor;
use crate::zone::{ZoneCursor, Zones};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Cooperative stop flag, shared with e.g. a signal handler.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Warmup { remaining: u32 },
    Scanning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    InactiveZone,
    AutoDetectOff,
    /// The classifier produced no result.
    Unclassified,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Cancelled,
    BudgetExhausted,
    CameraNotReady,
    /// A warm-up frame was discarded; `remaining` frames are left.
    WarmingUp { remaining: u32 },
    Skipped { zone: u32, reason: SkipReason },
    Classified {
        zone: u32,
        result: DetectionResult,
        /// Present when the result qualified and the reaction pipeline ran.
        reaction: Option<ReactionReport>,
    },
}

impl TickOutcome {
    /// True when the loop must stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickOutcome::Cancelled | TickOutcome::BudgetExhausted)
    }
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub warm_up_frames: u32,
    /// Maximum number of ticks; 0 is unbounded.
    pub frame_budget: u64,
    pub ready_timeout: Duration,
    /// Sleep after a tick that classified nothing.
    pub idle_delay: Duration,
    pub auto_detect: bool,
    pub target_label: String,
    pub confidence_threshold: f32,
    pub inactive_zones: Vec<u32>,
}

impl LoopSettings {
    pub fn from_config(cfg: &TilewatchConfig) -> Self {
        Self {
            warm_up_frames: cfg.scan.warm_up_frames,
            frame_budget: cfg.scan.frame_budget,
            ready_timeout: cfg.camera.ready_timeout,
            idle_delay: cfg.scan.idle_delay,
            auto_detect: cfg.scan.auto_detect,
            target_label: cfg.model.target_label.clone(),
            confidence_threshold: cfg.model.confidence_threshold,
            inactive_zones: cfg.grid.inactive_zones.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames_captured: u64,
    pub warmup_discarded: u64,
    pub not_ready: u64,
    pub skipped: u64,
    pub classifications: u64,
    pub classifier_failures: u64,
    /// Results that matched the target label and threshold.
    pub detections: u64,
    /// Deterrent activations that succeeded.
    pub reactions: u64,
}

type Sleeper = Box<dyn FnMut(Duration) + Send>;

pub struct DetectionLoop {
    camera: Box<dyn Camera>,
    tiler: FrameTiler,
    classifier: Box<dyn Classifier>,
    pipeline: ReactionPipeline,
    governor: ThermalGovernor,
    zones: Zones,
    cursor: ZoneCursor,
    phase: Phase,
    settings: LoopSettings,
    stats: LoopStats,
    cancel: CancelToken,
    sleeper: Sleeper,
    last_health_log: Instant,
}

impl DetectionLoop {
    pub fn new(
        camera: Box<dyn Camera>,
        tiler: FrameTiler,
        classifier: Box<dyn Classifier>,
        pipeline: ReactionPipeline,
        governor: ThermalGovernor,
        settings: LoopSettings,
    ) -> Result<Self> {
        let zones = Zones::new(tiler.geometry()).with_inactive(&settings.inactive_zones)?;
        let cursor = ZoneCursor::new(tiler.geometry().zone_count())?;
        let phase = if settings.warm_up_frames > 0 {
            Phase::Warmup {
                remaining: settings.warm_up_frames,
            }
        } else {
            Phase::Scanning
        };
        Ok(Self {
            camera,
            tiler,
            classifier,
            pipeline,
            governor,
            zones,
            cursor,
            phase,
            settings,
            stats: LoopStats::default(),
            cancel: CancelToken::new(),
            sleeper: Box::new(std::thread::sleep),
            last_health_log: Instant::now(),
        })
    }

    /// Build every collaborator from a validated configuration.
    pub fn from_config(cfg: &TilewatchConfig) -> Result<Self> {
        let camera = open_camera(&cfg.camera)?;
        let geometry = cfg.geometry()?;
        log::info!(
            "tiling {}x{} frames into {}x{} zones of {}px (overlap {:.2})",
            geometry.frame_width(),
            geometry.frame_height(),
            geometry.cols(),
            geometry.rows(),
            geometry.tile_size(),
            geometry.overlap()
        );
        let mut tiler = FrameTiler::new(geometry, cfg.model.input_width, cfg.model.input_height)?;
        if let Some(dir) = &cfg.scan.artifact_dir {
            tiler = tiler.with_artifact_dir(dir);
        }
        let classifier = build_classifier(&cfg.model)?;
        let pipeline = ReactionPipeline::from_config(cfg)?;
        let governor = ThermalGovernor::from_settings(&cfg.thermal)?;
        Self::new(
            camera,
            tiler,
            classifier,
            pipeline,
            governor,
            LoopSettings::from_config(cfg),
        )
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the idle sleep, e.g. to keep tests fast.
    pub fn with_sleeper(mut self, sleeper: impl FnMut(Duration) + Send + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn cursor(&self) -> ZoneCursor {
        self.cursor
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub fn tiler(&self) -> &FrameTiler {
        &self.tiler
    }

    pub fn set_auto_detect(&mut self, enabled: bool) {
        self.settings.auto_detect = enabled;
    }

    /// Push exposure/contrast to the camera and restart the sweep from a fresh frame.
    pub fn apply_acquisition(&mut self, settings: &AcquisitionSettings) -> Result<()> {
        self.camera.configure(settings)?;
        self.cursor.reset();
        self.tiler.reset();
        log::info!(
            "acquisition changed to {:?}; restarting sweep",
            settings
        );
        Ok(())
    }

    /// Run ticks until cancelled or the budget is spent.
    ///
    /// Camera acquisition errors end the loop with an error.
    pub fn run(&mut self) -> Result<LoopStats> {
        log::info!(
            "detection loop started: {} zones, target {} >= {:.2}, budget {}",
            self.cursor.zone_count(),
            self.settings.target_label,
            self.settings.confidence_threshold,
            if self.settings.frame_budget == 0 {
                "unbounded".to_string()
            } else {
                self.settings.frame_budget.to_string()
            }
        );
        loop {
            let outcome = self.tick()?;
            if outcome.is_terminal() {
                log::info!("detection loop stopping: {:?}", outcome);
                break;
            }
        }
        self.log_health();
        Ok(self.stats)
    }

    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }
        if self.settings.frame_budget > 0 && self.stats.ticks >= self.settings.frame_budget {
            return Ok(TickOutcome::BudgetExhausted);
        }
        self.stats.ticks += 1;
        if self.last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            self.log_health();
        }

        if !self.camera.ready(self.settings.ready_timeout) {
            self.stats.not_ready += 1;
            log::debug!("camera {} not ready", self.camera.name());
            return Ok(TickOutcome::CameraNotReady);
        }

        if let Phase::Warmup { remaining } = self.phase {
            self.camera.capture()?;
            self.stats.warmup_discarded += 1;
            let remaining = remaining.saturating_sub(1);
            self.phase = if remaining == 0 {
                log::info!("warm-up complete; scanning");
                Phase::Scanning
            } else {
                Phase::Warmup { remaining }
            };
            return Ok(TickOutcome::WarmingUp { remaining });
        }

        let zone = self.cursor.advance();
        if self.cursor.is_wrap() || !self.tiler.has_frame() {
            self.tiler.capture_new_frame(self.camera.as_mut())?;
            self.stats.frames_captured += 1;
            self.zones.clear_crops();
            self.governor.check();
        }

        let tile = self.tiler.tile_for(zone)?;
        self.zones.record_crop(zone, tile.crop);

        let outcome = if !self.zones.is_active(zone) {
            TickOutcome::Skipped {
                zone,
                reason: SkipReason::InactiveZone,
            }
        } else if !self.settings.auto_detect {
            TickOutcome::Skipped {
                zone,
                reason: SkipReason::AutoDetectOff,
            }
        } else {
            match self.classifier.predict(&tile.image) {
                None => {
                    self.stats.classifier_failures += 1;
                    TickOutcome::Skipped {
                        zone,
                        reason: SkipReason::Unclassified,
                    }
                }
                Some(result) => {
                    self.stats.classifications += 1;
                    let reaction = if result
                        .qualifies(&self.settings.target_label, self.settings.confidence_threshold)
                    {
                        self.stats.detections += 1;
                        let report = self.pipeline.react(&tile, &result);
                        if report
                            .deterrent
                            .as_ref()
                            .is_some_and(|d| d.outcome == DeterrentOutcome::Activated)
                        {
                            self.stats.reactions += 1;
                        }
                        Some(report)
                    } else {
                        None
                    };
                    TickOutcome::Classified {
                        zone,
                        result,
                        reaction,
                    }
                }
            }
        };

        if matches!(outcome, TickOutcome::Skipped { .. }) {
            self.stats.skipped += 1;
            (self.sleeper)(self.settings.idle_delay);
        }
        Ok(outcome)
    }

    fn log_health(&mut self) {
        self.last_health_log = Instant::now();
        let thermal = self.governor.monitor().snapshot();
        log::info!(
            "health: ticks={} frames={} classified={} failures={} detections={} reactions={} not_ready={} temp={:.1}C throttle_sleeps={}",
            self.stats.ticks,
            self.stats.frames_captured,
            self.stats.classifications,
            self.stats.classifier_failures,
            self.stats.detections,
            self.stats.reactions,
            self.stats.not_ready,
            thermal.celsius,
            thermal.throttle_sleeps
        );
    }
}
