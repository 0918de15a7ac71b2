//! Frame snapshots and tiling.
//!
//! - `Frame`: one captured full-resolution image. Replaced, never mutated.
//! - `Tile`: a resized crop of the current frame for one zone.
//! - `FrameTiler`: owns the current frame and produces tiles from it.
//!
//! All tiles of a sweep are cut from the same `Frame`; only a capture at the
//! wraparound replaces it.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;

use crate::ingest::Camera;
use crate::storage::write_image_atomic;
use crate::tiling::{CropRect, TilingGeometry};

/// Canonical name of the latest full-frame artifact.
pub const LATEST_FRAME_ARTIFACT: &str = "frame.jpg";

pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: DateTime<Local>,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self::with_timestamp(image, sequence, Local::now())
    }

    pub fn with_timestamp(image: RgbImage, sequence: u64, captured_at: DateTime<Local>) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Camera-assigned capture counter.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Shared handle to the pixels, handed to tiles cut from this frame.
    pub fn shared_image(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }
}

#[derive(Clone, Debug)]
pub struct Tile {
    pub zone_id: u32,
    pub crop: CropRect,
    pub image: RgbImage,
    /// Full source frame the crop was taken from.
    pub frame: Arc<RgbImage>,
    pub captured_at: DateTime<Local>,
    pub frame_sequence: u64,
}

impl Tile {
    /// Deterministic per-zone name, overwritten every sweep.
    pub fn short_filename(&self) -> String {
        format!("tile-{}.jpg", self.zone_id)
    }

    /// Name for the full source frame, shared by every tile of a sweep.
    pub fn frame_filename(&self) -> String {
        format!(
            "frame-{}-{}.jpg",
            self.captured_at.format("%Y%m%d%H%M%S"),
            self.frame_sequence
        )
    }

    /// Traceable name including the capture time and sequence of the source frame.
    ///
    /// The sequence keeps names unique when several frames share a second.
    pub fn long_filename(&self) -> String {
        format!(
            "tile-{}-{}-{}.jpg",
            self.zone_id,
            self.captured_at.format("%Y%m%d%H%M%S"),
            self.frame_sequence
        )
    }
}

pub struct FrameTiler {
    geometry: TilingGeometry,
    output_width: u32,
    output_height: u32,
    frame: Option<Frame>,
    artifact_dir: Option<PathBuf>,
    captures: u64,
}

impl FrameTiler {
    /// `output_width` x `output_height` is the classifier input size every tile
    /// is resized to, independent of the crop extent.
    pub fn new(geometry: TilingGeometry, output_width: u32, output_height: u32) -> Result<Self> {
        if output_width == 0 || output_height == 0 {
            return Err(anyhow!("tile output size must be > 0"));
        }
        Ok(Self {
            geometry,
            output_width,
            output_height,
            frame: None,
            artifact_dir: None,
            captures: 0,
        })
    }

    /// Persist the latest frame and per-zone tiles under `dir` for diagnostics.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn geometry(&self) -> &TilingGeometry {
        &self.geometry
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    /// Number of frames captured since construction.
    pub fn captures(&self) -> u64 {
        self.captures
    }

    pub fn capture_new_frame(&mut self, camera: &mut dyn Camera) -> Result<&Frame> {
        let frame = camera.capture()?;
        if frame.width() != self.geometry.frame_width()
            || frame.height() != self.geometry.frame_height()
        {
            return Err(anyhow!(
                "camera {} delivered {}x{}, expected {}x{}",
                camera.name(),
                frame.width(),
                frame.height(),
                self.geometry.frame_width(),
                self.geometry.frame_height()
            ));
        }
        self.captures += 1;
        log::debug!(
            "captured frame #{} ({}x{}) from {}",
            frame.sequence(),
            frame.width(),
            frame.height(),
            camera.name()
        );

        if let Some(dir) = &self.artifact_dir {
            let path = dir.join(LATEST_FRAME_ARTIFACT);
            if let Err(e) = write_image_atomic(&path, frame.image()) {
                log::warn!("failed to save latest frame {}: {:#}", path.display(), e);
            }
        }

        Ok(self.frame.insert(frame))
    }

    pub fn tile_for(&self, zone_id: u32) -> Result<Tile> {
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| anyhow!("no frame captured; capture before requesting tiles"))?;
        let crop = self.geometry.crop_rect(zone_id)?;

        let cropped =
            imageops::crop_imm(frame.image(), crop.left, crop.top, crop.size, crop.size).to_image();
        let image = if cropped.dimensions() == (self.output_width, self.output_height) {
            cropped
        } else {
            imageops::resize(
                &cropped,
                self.output_width,
                self.output_height,
                FilterType::Triangle,
            )
        };

        let tile = Tile {
            zone_id,
            crop,
            image,
            frame: frame.shared_image(),
            captured_at: frame.captured_at(),
            frame_sequence: frame.sequence(),
        };

        if let Some(dir) = &self.artifact_dir {
            let path = dir.join(tile.short_filename());
            if let Err(e) = write_image_atomic(&path, &tile.image) {
                log::warn!("failed to save tile {}: {:#}", path.display(), e);
            }
        }

        Ok(tile)
    }

    /// Drop the current frame so the next sweep starts from a fresh capture.
    pub fn reset(&mut self) {
        self.frame = None;
    }
}
