#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::classify::backend::Classifier;
use crate::classify::result::{round_confidence, DetectionResult, LabelScore};

/// Local ONNX image classifier.
///
/// Expects an NCHW float input of `1 x 3 x height x width` scaled to `[0, 1]`
/// and a single score vector output, one entry per label. Scores that do not
/// sum to one are passed through softmax.
pub struct TractClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    width: u32,
    height: u32,
}

impl TractClassifier {
    pub fn new(
        model_path: &Path,
        labels_path: Option<&Path>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = match labels_path {
            Some(path) => read_labels(path)?,
            None => Vec::new(),
        };

        Ok(Self {
            model,
            labels,
            width,
            height,
        })
    }

    fn build_input(&self, tile: &RgbImage) -> Result<Tensor> {
        if tile.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "tile size {}x{} does not match model input {}x{}",
                tile.width(),
                tile.height(),
                self.width,
                self.height
            ));
        }
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| tile.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn label_for(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &str {
        "tract"
    }

    fn classify(&mut self, tile: &RgbImage) -> Result<DetectionResult> {
        let input = self.build_input(tile)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let raw: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        let scores = normalize_scores(&raw);

        let (best, confidence) = scores
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| anyhow!("model produced an empty score vector"))?;
        let ranked = scores
            .iter()
            .enumerate()
            .map(|(index, score)| LabelScore::new(self.label_for(index), round_confidence(*score)))
            .collect();
        Ok(DetectionResult::new(self.label_for(best), round_confidence(confidence)).with_ranked(ranked))
    }
}

fn read_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels from {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn normalize_scores(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    let is_distribution = raw.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        return raw.to_vec();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}
