//! Tile geometry.
//!
//! A frame of `W x H` pixels is split into a `cols x rows` grid of cells. Each
//! cell is read through one square crop of `tile_size` pixels anchored at the
//! cell's top-left corner. Crops that would run off the frame are shifted back
//! by the excess, so every crop lies inside the frame and keeps its size.
//!
//! `tile_size` is `floor(overlap * max(ceil(W/cols), ceil(H/rows)))`, raised to
//! the trailing cell's extent on either axis and capped at the shorter frame
//! side. Together with the shift this guarantees the crops cover the full frame.

use anyhow::{anyhow, Result};

/// Square crop rectangle in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub size: u32,
}

impl CropRect {
    /// Inclusive right edge.
    pub fn right(&self) -> u32 {
        self.left + self.size - 1
    }

    /// Inclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.top + self.size - 1
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x <= self.right() && y >= self.top && y <= self.bottom()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TilingGeometry {
    frame_width: u32,
    frame_height: u32,
    cols: u32,
    rows: u32,
    overlap: f64,
    tile_size: u32,
}

impl TilingGeometry {
    pub fn new(frame_width: u32, frame_height: u32, cols: u32, rows: u32, overlap: f64) -> Result<Self> {
        validate_grid(frame_width, frame_height, cols, rows, overlap)?;

        let nominal = ceil_div(frame_width, cols).max(ceil_div(frame_height, rows));
        let scaled = (nominal as f64 * overlap).floor() as u32;
        let trailing = trailing_extent(frame_width, cols).max(trailing_extent(frame_height, rows));
        let limit = frame_width.min(frame_height);
        if trailing > limit {
            return Err(anyhow!(
                "a {}x{} grid cannot cover a {}x{} frame with square tiles",
                cols,
                rows,
                frame_width,
                frame_height
            ));
        }

        Ok(Self {
            frame_width,
            frame_height,
            cols,
            rows,
            overlap,
            tile_size: scaled.max(trailing).min(limit),
        })
    }

    /// Override the computed tile size.
    ///
    /// The override must still cover every cell and fit inside the frame.
    pub fn with_tile_size(mut self, tile_size: u32) -> Result<Self> {
        let minimum = self.minimum_tile_size();
        let maximum = self.frame_width.min(self.frame_height);
        if tile_size < minimum || tile_size > maximum {
            return Err(anyhow!(
                "tile size {} outside [{}, {}] for a {}x{} grid over {}x{}",
                tile_size,
                minimum,
                maximum,
                self.cols,
                self.rows,
                self.frame_width,
                self.frame_height
            ));
        }
        self.tile_size = tile_size;
        Ok(self)
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn zone_count(&self) -> u32 {
        self.cols * self.rows
    }

    /// `(row, col)` of a zone id.
    pub fn cell_of(&self, zone_id: u32) -> Result<(u32, u32)> {
        if zone_id >= self.zone_count() {
            return Err(anyhow!(
                "zone {} out of range (grid has {} zones)",
                zone_id,
                self.zone_count()
            ));
        }
        Ok((zone_id / self.cols, zone_id % self.cols))
    }

    pub fn crop_rect(&self, zone_id: u32) -> Result<CropRect> {
        let (row, col) = self.cell_of(zone_id)?;
        let left = shift_inside(col * (self.frame_width / self.cols), self.tile_size, self.frame_width);
        let top = shift_inside(row * (self.frame_height / self.rows), self.tile_size, self.frame_height);
        Ok(CropRect {
            left,
            top,
            size: self.tile_size,
        })
    }

    pub fn crop_rects(&self) -> Vec<CropRect> {
        (0..self.zone_count())
            .filter_map(|zone_id| self.crop_rect(zone_id).ok())
            .collect()
    }

    fn minimum_tile_size(&self) -> u32 {
        ceil_div(self.frame_width, self.cols)
            .max(ceil_div(self.frame_height, self.rows))
            .max(trailing_extent(self.frame_width, self.cols))
            .max(trailing_extent(self.frame_height, self.rows))
    }
}

fn validate_grid(frame_width: u32, frame_height: u32, cols: u32, rows: u32, overlap: f64) -> Result<()> {
    if frame_width == 0 || frame_height == 0 {
        return Err(anyhow!("frame dimensions must be > 0"));
    }
    if cols == 0 || rows == 0 {
        return Err(anyhow!("grid cols and rows must be >= 1 (got {}x{})", cols, rows));
    }
    if cols > frame_width || rows > frame_height {
        return Err(anyhow!(
            "grid {}x{} is finer than the {}x{} frame",
            cols,
            rows,
            frame_width,
            frame_height
        ));
    }
    if !overlap.is_finite() || overlap < 1.0 {
        return Err(anyhow!("overlap factor must be >= 1.0 (got {})", overlap));
    }
    Ok(())
}

fn ceil_div(value: u32, parts: u32) -> u32 {
    value.div_ceil(parts)
}

/// Pixels spanned by the last cell on an axis, which absorbs the division remainder.
fn trailing_extent(extent: u32, parts: u32) -> u32 {
    extent - (parts - 1) * (extent / parts)
}

/// Move a span of `size` starting at `start` back inside `[0, extent)`.
fn shift_inside(start: u32, size: u32, extent: u32) -> u32 {
    let end = start + size - 1;
    if end >= extent {
        start - (end - (extent - 1))
    } else {
        start
    }
}
