//! tilewatch
//!
//! Watches a wide field of view with a fixed-resolution camera by scanning it in
//! overlapping square tiles, one tile per control-loop tick, and reacts to a
//! qualifying classification by saving evidence and firing a deterrent.
//!
//! # Architecture
//!
//! - `tiling`: pure tile geometry (size, crop rectangles, full-frame coverage)
//! - `frame`: `Frame` snapshots and the `FrameTiler` that crops/resizes tiles
//! - `zone`: round-robin `ZoneCursor` and per-zone records
//! - `thermal`: blocking over-temperature pacing
//! - `scan`: the `DetectionLoop` state machine (warm-up, scanning)
//! - `react`: evidence, upload, deterrent and journal side effects
//! - `ingest` / `classify`: camera and classifier capabilities plus bindings
//! - `config`: file + environment configuration, validated at startup

use anyhow::{anyhow, Result};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

pub mod classify;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod react;
pub mod scan;
pub mod storage;
pub mod thermal;
pub mod tiling;
pub mod zone;

pub use classify::{BoundingBox, Classifier, ClassifierKind, DetectionResult, LabelScore};
pub use config::TilewatchConfig;
pub use frame::{Frame, FrameTiler, Tile};
pub use ingest::{AcquisitionSettings, Camera};
pub use react::{DeterrentInvocation, DeterrentOutcome, ReactionPipeline, ReactionReport};
pub use scan::{CancelToken, DetectionLoop, LoopSettings, LoopStats, Phase, SkipReason, TickOutcome};
pub use storage::{EvidenceStore, FsEvidenceStore};
pub use thermal::{ThermalGovernor, ThermalMonitor, ThermalStatus};
pub use tiling::{CropRect, TilingGeometry};
pub use zone::{Zone, ZoneCursor, Zones};

// -------------------- Time Buckets --------------------

pub const ONE_HOUR_S: u32 = 3600;

/// Coarse wall-clock bucket used to group evidence on disk.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBucket {
    /// start of bucket in seconds since epoch
    pub start_epoch_s: u64,
    /// bucket size in seconds (e.g., 3600 = 1 hour)
    pub size_s: u32,
}

impl TimeBucket {
    pub fn containing(epoch_s: u64, bucket_size_s: u32) -> Result<Self> {
        if bucket_size_s == 0 {
            return Err(anyhow!("time bucket size must be > 0"));
        }
        let size = bucket_size_s as u64;
        Ok(TimeBucket {
            start_epoch_s: (epoch_s / size) * size,
            size_s: bucket_size_s,
        })
    }

    /// Directory name for this bucket, in local time (e.g. `20240512-1400`).
    pub fn dir_name(&self) -> String {
        match Local.timestamp_opt(self.start_epoch_s as i64, 0).single() {
            Some(start) => start.format("%Y%m%d-%H%M").to_string(),
            None => format!("bucket-{}", self.start_epoch_s),
        }
    }
}
