use anyhow::{anyhow, Result};

use crate::tiling::{CropRect, TilingGeometry};

/// Round-robin position over the zones of a grid.
///
/// Starts before the first zone. Advancing onto zone 0 is a wrap: the caller
/// must capture a fresh frame before reading any tile of the new sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneCursor {
    zone_count: u32,
    current: Option<u32>,
}

impl ZoneCursor {
    pub fn new(zone_count: u32) -> Result<Self> {
        if zone_count == 0 {
            return Err(anyhow!("zone cursor needs at least one zone"));
        }
        Ok(Self {
            zone_count,
            current: None,
        })
    }

    pub fn advance(&mut self) -> u32 {
        let next = match self.current {
            Some(current) => (current + 1) % self.zone_count,
            None => 0,
        };
        self.current = Some(next);
        next
    }

    pub fn is_wrap(&self) -> bool {
        self.current == Some(0)
    }

    /// Return to the position before the first zone.
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    /// Signed position, `-1` before the first zone.
    pub fn position(&self) -> i64 {
        self.current.map(i64::from).unwrap_or(-1)
    }

    pub fn zone_count(&self) -> u32 {
        self.zone_count
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    pub id: u32,
    pub row: u32,
    pub col: u32,
    pub active: bool,
    /// Crop used for the most recent tile of this zone.
    pub last_crop: Option<CropRect>,
}

/// Per-zone records for a grid. Holds no image data.
#[derive(Clone, Debug)]
pub struct Zones {
    zones: Vec<Zone>,
}

impl Zones {
    /// All zones of the geometry, active.
    pub fn new(geometry: &TilingGeometry) -> Self {
        let zones = (0..geometry.zone_count())
            .map(|id| Zone {
                id,
                row: id / geometry.cols(),
                col: id % geometry.cols(),
                active: true,
                last_crop: None,
            })
            .collect();
        Self { zones }
    }

    pub fn with_inactive(mut self, inactive: &[u32]) -> Result<Self> {
        for &id in inactive {
            self.set_active(id, false)?;
        }
        Ok(self)
    }

    pub fn get(&self, id: u32) -> Option<&Zone> {
        self.zones.get(id as usize)
    }

    pub fn is_active(&self, id: u32) -> bool {
        self.get(id).is_some_and(|zone| zone.active)
    }

    pub fn set_active(&mut self, id: u32, active: bool) -> Result<()> {
        let count = self.zones.len();
        let zone = self
            .zones
            .get_mut(id as usize)
            .ok_or_else(|| anyhow!("zone {} out of range (grid has {} zones)", id, count))?;
        zone.active = active;
        Ok(())
    }

    pub fn record_crop(&mut self, id: u32, crop: CropRect) {
        if let Some(zone) = self.zones.get_mut(id as usize) {
            zone.last_crop = Some(crop);
        }
    }

    /// Forget every recorded crop; called when a new frame replaces the old one.
    pub fn clear_crops(&mut self) {
        for zone in &mut self.zones {
            zone.last_crop = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
