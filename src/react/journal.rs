//! Append-only CSV of qualifying detections.
//!
//! Coordinates are full-frame pixels: a backend box is mapped back through the
//! tile's crop, and a result without a box reports the whole crop.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::classify::{BoundingBox, DetectionResult};
use crate::frame::Tile;

pub const JOURNAL_HEADER: &str = "timestamp,label,confidence,zone,x1,y1,x2,y2,cx,cy,w,h,area";

pub struct DetectionJournal {
    path: PathBuf,
}

impl DetectionJournal {
    /// Create the file with a header line unless it already has content.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create journal directory {}", parent.display()))?;
        }
        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        if needs_header {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open journal {}", path.display()))?;
            writeln!(file, "{}", JOURNAL_HEADER)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &mut self,
        at: DateTime<Local>,
        label: &str,
        tile: &Tile,
        result: &DetectionResult,
    ) -> Result<()> {
        let bbox = frame_box(tile, result.bbox.as_ref());
        let (cx, cy) = bbox.center();
        let line = format!(
            "{},{},{:.4},{},{:.0},{:.0},{:.0},{:.0},{:.0},{:.0},{:.0},{:.0},{:.0}",
            at.format("%Y-%m-%d %H:%M:%S"),
            label,
            result.confidence,
            tile.zone_id,
            bbox.x1,
            bbox.y1,
            bbox.x2,
            bbox.y2,
            cx,
            cy,
            bbox.width(),
            bbox.height(),
            bbox.area()
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {}", self.path.display()))?;
        writeln!(file, "{}", line).with_context(|| format!("append to {}", self.path.display()))
    }
}

/// Map a box in tile pixels to full-frame pixels.
pub fn frame_box(tile: &Tile, bbox: Option<&BoundingBox>) -> BoundingBox {
    let crop = tile.crop;
    let Some(bbox) = bbox else {
        return BoundingBox::new(
            crop.left as f32,
            crop.top as f32,
            crop.right() as f32,
            crop.bottom() as f32,
        );
    };
    let sx = crop.size as f32 / tile.image.width().max(1) as f32;
    let sy = crop.size as f32 / tile.image.height().max(1) as f32;
    BoundingBox::new(
        crop.left as f32 + bbox.x1 * sx,
        crop.top as f32 + bbox.y1 * sy,
        crop.left as f32 + bbox.x2 * sx,
        crop.top as f32 + bbox.y2 * sy,
    )
}
