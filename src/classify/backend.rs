use anyhow::Result;
use image::RgbImage;

use super::result::DetectionResult;

/// Classifier capability.
///
/// Backends implement `classify`; the detection loop calls `predict`, which
/// never fails. A backend error means "not classified this tick".
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Classify one tile at the model input size.
    fn classify(&mut self, tile: &RgbImage) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    fn predict(&mut self, tile: &RgbImage) -> Option<DetectionResult> {
        match self.classify(tile) {
            Ok(result) => {
                log::debug!(
                    "{}: {} @ {:.4}",
                    self.name(),
                    result.label,
                    result.confidence
                );
                Some(result)
            }
            Err(e) => {
                log::warn!("classifier {} failed: {:#}", self.name(), e);
                None
            }
        }
    }
}
