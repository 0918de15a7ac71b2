//! Reactions to a qualifying detection.
//!
//! `ReactionPipeline::react` runs, in order:
//! 1. persist the tile as evidence under `<label>/<time bucket>/zone-<id>/`
//! 2. persist the full source frame under `Full/<time bucket>/` and a copy of
//!    the tile with the detection box drawn under `.../zone-<id>/annotated/`
//!    (each when enabled; the annotated copy needs a box)
//! 3. upload a copy (when an uploader is configured)
//! 4. send a detection notification (when a notifier is configured)
//! 5. fire the deterrent (when deter mode is on and no cooldown is pending)
//! 6. append a line to the detection journal (when configured)
//!
//! Every step is best-effort. Failures are logged and recorded in the
//! `ReactionReport`; none of them abort the pipeline or the detection loop.

use anyhow::{Context, Result};
use chrono::Local;
use image::RgbImage;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::classify::DetectionResult;
use crate::config::TilewatchConfig;
use crate::frame::Tile;
use crate::storage::{EvidenceStore, FsEvidenceStore};
use crate::TimeBucket;

pub mod annotate;
pub mod deterrent;
pub mod journal;
pub mod notify;
pub mod upload;

pub use annotate::outline_detection;
pub use deterrent::{build_deterrent, Deterrent, DeterrentKind, LogDeterrent};
pub use journal::DetectionJournal;
pub use notify::{build_notifier, Notifier};
pub use upload::{build_uploader, Uploader};

/// Directory, under the evidence root, that holds full source frames.
pub const FULL_FRAME_DIR: &str = "Full";
const ANNOTATED_DIR: &str = "annotated";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeterrentOutcome {
    Activated,
    Failed(String),
    /// Skipped because the previous activation is within the cooldown.
    SkippedCooldown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeterrentInvocation {
    pub requested_secs: u32,
    /// Requested time floored to the configured minimum.
    pub issued_secs: u32,
    pub label: String,
    pub outcome: DeterrentOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReactionReport {
    pub evidence_path: Option<PathBuf>,
    pub frame_path: Option<PathBuf>,
    pub annotated_path: Option<PathBuf>,
    pub upload_url: Option<String>,
    /// True when a notifier accepted the detection.
    pub notified: bool,
    pub deterrent: Option<DeterrentInvocation>,
}

pub struct ReactionPipeline {
    store: Box<dyn EvidenceStore>,
    deterrent: Box<dyn Deterrent>,
    uploader: Option<Box<dyn Uploader>>,
    notifier: Option<Box<dyn Notifier>>,
    journal: Option<DetectionJournal>,
    save_full_frame: bool,
    save_annotated: bool,
    deter: bool,
    deter_secs: u32,
    min_deter_secs: u32,
    cooldown: Duration,
    bucket_secs: u32,
    last_activation: Option<Instant>,
    label_unsafe: Regex,
}

impl ReactionPipeline {
    /// Deter mode and the extra evidence copies start off; enable them with
    /// `with_deter` and `with_extra_evidence`.
    pub fn new(store: Box<dyn EvidenceStore>, deterrent: Box<dyn Deterrent>) -> Result<Self> {
        Ok(Self {
            store,
            deterrent,
            uploader: None,
            notifier: None,
            journal: None,
            save_full_frame: false,
            save_annotated: false,
            deter: false,
            deter_secs: 15,
            min_deter_secs: 3,
            cooldown: Duration::ZERO,
            bucket_secs: crate::ONE_HOUR_S,
            last_activation: None,
            label_unsafe: Regex::new(r"[^A-Za-z0-9_-]+").context("compile label filter")?,
        })
    }

    pub fn from_config(cfg: &TilewatchConfig) -> Result<Self> {
        let reaction = &cfg.reaction;
        let store = FsEvidenceStore::new(&reaction.evidence_dir)?;
        let deterrent = build_deterrent(&cfg.deterrent)?;
        let uploader = build_uploader(cfg.upload.as_ref())?;
        let notifier = build_notifier(cfg.notify.as_ref())?;
        let journal = match &reaction.journal_path {
            Some(path) => Some(DetectionJournal::open(path)?),
            None => None,
        };
        log::info!(
            "reactions: evidence in {}, deterrent {} ({}), upload {}, notify {}, journal {}",
            reaction.evidence_dir.display(),
            deterrent.name(),
            if reaction.deter { "armed" } else { "disarmed" },
            uploader.as_ref().map_or("off", |u| u.name()),
            notifier.as_ref().map_or("off", |n| n.name()),
            journal
                .as_ref()
                .map_or_else(|| "off".to_string(), |j| j.path().display().to_string())
        );

        let mut pipeline = Self::new(Box::new(store), deterrent)?
            .with_deter(reaction.deter)
            .with_deter_secs(reaction.deter_secs, reaction.min_deter_secs)
            .with_cooldown(reaction.cooldown)
            .with_bucket_secs(reaction.bucket_secs)
            .with_extra_evidence(reaction.save_full_frame, reaction.save_annotated);
        pipeline.uploader = uploader;
        pipeline.notifier = notifier;
        pipeline.journal = journal;
        Ok(pipeline)
    }

    pub fn with_deter(mut self, deter: bool) -> Self {
        self.deter = deter;
        self
    }

    pub fn with_deter_secs(mut self, requested: u32, minimum: u32) -> Self {
        self.deter_secs = requested;
        self.min_deter_secs = minimum;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_bucket_secs(mut self, bucket_secs: u32) -> Self {
        self.bucket_secs = bucket_secs;
        self
    }

    pub fn with_uploader(mut self, uploader: Box<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_journal(mut self, journal: DetectionJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_extra_evidence(mut self, full_frame: bool, annotated: bool) -> Self {
        self.save_full_frame = full_frame;
        self.save_annotated = annotated;
        self
    }

    pub fn deter(&self) -> bool {
        self.deter
    }

    /// Relative evidence path for a tile: `<label>/<bucket>/zone-<id>/<long filename>`.
    pub fn evidence_path(&self, tile: &Tile, label: &str) -> PathBuf {
        PathBuf::from(self.safe_label(label))
            .join(self.bucket_dir(tile))
            .join(format!("zone-{}", tile.zone_id))
            .join(tile.long_filename())
    }

    /// Relative path of the full source frame: `Full/<bucket>/<frame filename>`.
    pub fn frame_path(&self, tile: &Tile) -> PathBuf {
        PathBuf::from(FULL_FRAME_DIR)
            .join(self.bucket_dir(tile))
            .join(tile.frame_filename())
    }

    /// Relative path of the annotated copy, next to the tile evidence.
    pub fn annotated_path(&self, tile: &Tile, label: &str) -> PathBuf {
        PathBuf::from(self.safe_label(label))
            .join(self.bucket_dir(tile))
            .join(format!("zone-{}", tile.zone_id))
            .join(ANNOTATED_DIR)
            .join(tile.long_filename())
    }

    fn bucket_dir(&self, tile: &Tile) -> String {
        let epoch_s = tile.captured_at.timestamp().max(0) as u64;
        match TimeBucket::containing(epoch_s, self.bucket_secs) {
            Ok(bucket) => bucket.dir_name(),
            Err(_) => "unbucketed".to_string(),
        }
    }

    fn safe_label(&self, label: &str) -> String {
        let cleaned = self.label_unsafe.replace_all(label.trim(), "_");
        if cleaned.is_empty() || cleaned == "_" {
            "unlabeled".to_string()
        } else {
            cleaned.into_owned()
        }
    }

    pub fn react(&mut self, tile: &Tile, result: &DetectionResult) -> ReactionReport {
        let label = self.safe_label(&result.label);
        log::info!(
            "detected {} @ {:.4} in zone {}",
            result.label,
            result.confidence,
            tile.zone_id
        );

        let relative = self.evidence_path(tile, &result.label);
        let evidence_path = self.persist(&relative, &tile.image, "evidence");

        let frame_path = if self.save_full_frame {
            let relative = self.frame_path(tile);
            self.persist(&relative, &tile.frame, "full frame")
        } else {
            None
        };

        let annotated_path = match (&result.bbox, self.save_annotated) {
            (Some(bbox), true) => match outline_detection(&tile.image, bbox) {
                Some(annotated) => {
                    let relative = self.annotated_path(tile, &result.label);
                    self.persist(&relative, &annotated, "annotated copy")
                }
                None => {
                    log::debug!("detection box {:?} lies outside the tile", bbox);
                    None
                }
            },
            _ => None,
        };

        let upload_url = self.upload(tile, &label);
        let notified = self.notify(tile, result);

        let deterrent = if self.deter {
            Some(self.fire_deterrent(&result.label))
        } else {
            None
        };

        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.append(Local::now(), &label, tile, result) {
                log::warn!("failed to append detection journal: {:#}", e);
            }
        }

        ReactionReport {
            evidence_path,
            frame_path,
            annotated_path,
            upload_url,
            notified,
            deterrent,
        }
    }

    fn persist(&mut self, relative: &Path, image: &RgbImage, what: &str) -> Option<PathBuf> {
        match self.store.persist(relative, image) {
            Ok(path) => {
                log::info!("saved {} {}", what, path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("failed to save {} {}: {:#}", what, relative.display(), e);
                None
            }
        }
    }

    fn notify(&mut self, tile: &Tile, result: &DetectionResult) -> bool {
        let Some(notifier) = self.notifier.as_mut() else {
            return false;
        };
        match notifier.notify(&result.label, result.confidence, tile.zone_id) {
            Ok(()) => {
                log::info!("notified {} of {} in zone {}", notifier.name(), result.label, tile.zone_id);
                true
            }
            Err(e) => {
                log::warn!("notification via {} failed: {:#}", notifier.name(), e);
                false
            }
        }
    }

    fn upload(&mut self, tile: &Tile, label: &str) -> Option<String> {
        let uploader = self.uploader.as_mut()?;
        let description = format!("{}-{}", label, tile.long_filename());
        match uploader.upload(&tile.image, &description) {
            Ok(url) => {
                log::info!("uploaded {} to {}", description, url);
                Some(url)
            }
            Err(e) => {
                log::warn!("upload via {} failed: {:#}", uploader.name(), e);
                None
            }
        }
    }

    fn fire_deterrent(&mut self, label: &str) -> DeterrentInvocation {
        let requested_secs = self.deter_secs;
        let issued_secs = requested_secs.max(self.min_deter_secs);
        let cooling = !self.cooldown.is_zero()
            && self
                .last_activation
                .is_some_and(|last| last.elapsed() < self.cooldown);

        let outcome = if cooling {
            log::info!(
                "deterrent {} cooling down; skipping activation for {}",
                self.deterrent.name(),
                label
            );
            DeterrentOutcome::SkippedCooldown
        } else {
            match self.deterrent.activate(issued_secs, label) {
                Ok(()) => {
                    self.last_activation = Some(Instant::now());
                    log::info!(
                        "deterrent {} activated for {}s ({})",
                        self.deterrent.name(),
                        issued_secs,
                        label
                    );
                    DeterrentOutcome::Activated
                }
                Err(e) => {
                    log::error!("deterrent {} failed: {:#}", self.deterrent.name(), e);
                    DeterrentOutcome::Failed(format!("{:#}", e))
                }
            }
        };

        DeterrentInvocation {
            requested_secs,
            issued_secs,
            label: label.to_string(),
            outcome,
        }
    }
}
