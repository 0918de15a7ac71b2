/// Outcome of classifying one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub label: String,
    /// Confidence of `label`, in `[0, 1]`.
    pub confidence: f32,
    /// Location of the detection in tile pixel coordinates, when the backend reports one.
    pub bbox: Option<BoundingBox>,
    /// All labels reported by the backend, most confident first.
    pub ranked: Vec<LabelScore>,
}

impl DetectionResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: clamp_unit(confidence),
            bbox: None,
            ranked: Vec::new(),
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_ranked(mut self, mut ranked: Vec<LabelScore>) -> Self {
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        self.ranked = ranked;
        self
    }

    /// True when this result should trigger a reaction.
    pub fn qualifies(&self, target_label: &str, threshold: f32) -> bool {
        self.label == target_label && self.confidence >= threshold
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub confidence: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: clamp_unit(confidence),
        }
    }
}

/// Axis-aligned box, corners inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Round to 4 decimal places, the precision confidences are reported with.
pub fn round_confidence(confidence: f32) -> f32 {
    ((confidence as f64 * 10_000.0).round() / 10_000.0) as f32
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
