use anyhow::Result;
use image::RgbImage;

use crate::classify::backend::Classifier;
use crate::classify::result::{round_confidence, DetectionResult, LabelScore};

/// Label reported when no bright pixels are present.
pub const BACKGROUND_LABEL: &str = "Background";

/// Share of near-white pixels at which the brightness heuristic is fully confident.
const FULL_CONFIDENCE_FRACTION: f32 = 0.02;

/// Channel level treated as "near white".
const BRIGHT_LEVEL: u8 = 240;

enum Mode {
    Fixed(DetectionResult),
    Brightness { target_label: String },
}

/// Model-free classifier for tests and dry runs.
///
/// In brightness mode a tile containing near-white pixels is reported as the
/// target label, with confidence growing with the bright area. This matches
/// the bright squares rendered by the synthetic camera.
pub struct StubClassifier {
    mode: Mode,
}

impl StubClassifier {
    /// Always return `result`.
    pub fn fixed(result: DetectionResult) -> Self {
        Self {
            mode: Mode::Fixed(result),
        }
    }

    pub fn brightness(target_label: &str) -> Self {
        Self {
            mode: Mode::Brightness {
                target_label: target_label.to_string(),
            },
        }
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &str {
        "stub"
    }

    fn classify(&mut self, tile: &RgbImage) -> Result<DetectionResult> {
        let target_label = match &self.mode {
            Mode::Fixed(result) => return Ok(result.clone()),
            Mode::Brightness { target_label } => target_label,
        };

        let total = (tile.width() as usize * tile.height() as usize).max(1);
        let bright = tile
            .pixels()
            .filter(|p| p.0.iter().all(|&c| c >= BRIGHT_LEVEL))
            .count();
        let fraction = bright as f32 / total as f32;
        let target_confidence = round_confidence((fraction / FULL_CONFIDENCE_FRACTION).min(1.0));
        let ranked = vec![
            LabelScore::new(target_label.as_str(), target_confidence),
            LabelScore::new(BACKGROUND_LABEL, 1.0 - target_confidence),
        ];

        let result = if bright > 0 {
            DetectionResult::new(target_label.as_str(), target_confidence)
        } else {
            DetectionResult::new(BACKGROUND_LABEL, 1.0)
        };
        Ok(result.with_ranked(ranked))
    }
}
