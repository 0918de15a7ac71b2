//! Remote inference over HTTP.
//!
//! Both backends POST the tile as a base64 PNG:
//!
//! ```json
//! {"inputs": {"Image": "<base64 png>"}}
//! ```
//!
//! `RemoteClassifier` reads an image-classification reply
//! (`outputs.Prediction` / `outputs.Labels`); `RemoteDetector` reads an
//! object-detection reply (`Items` with label, score and box).

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::classify::backend::Classifier;
use crate::classify::result::{round_confidence, BoundingBox, DetectionResult, LabelScore};
use crate::storage::image_to_base64_png;

/// Label reported by the detector when no item was found.
pub const NO_DETECTION_LABEL: &str = "None";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RemoteClassifier {
    endpoint: String,
    agent: ureq::Agent,
}

impl RemoteClassifier {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            agent: build_agent(),
        })
    }
}

impl Classifier for RemoteClassifier {
    fn name(&self) -> &str {
        "remote"
    }

    fn classify(&mut self, tile: &RgbImage) -> Result<DetectionResult> {
        let reply = post_image(&self.agent, &self.endpoint, tile)?;
        parse_classification(&reply)
    }
}

pub struct RemoteDetector {
    endpoint: String,
    target_label: String,
    agent: ureq::Agent,
}

impl RemoteDetector {
    pub fn new(endpoint: &str, target_label: &str) -> Result<Self> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            target_label: target_label.to_string(),
            agent: build_agent(),
        })
    }
}

impl Classifier for RemoteDetector {
    fn name(&self) -> &str {
        "remote_detector"
    }

    fn classify(&mut self, tile: &RgbImage) -> Result<DetectionResult> {
        let reply = post_image(&self.agent, &self.endpoint, tile)?;
        parse_detection(&reply, &self.target_label)
    }
}

fn parse_endpoint(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint).with_context(|| format!("invalid model url '{}'", endpoint))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("model url must be http(s), got '{}'", url.scheme()));
    }
    Ok(url.to_string())
}

fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build()
}

fn post_image(agent: &ureq::Agent, endpoint: &str, tile: &RgbImage) -> Result<Value> {
    let body = json!({ "inputs": { "Image": image_to_base64_png(tile)? } });
    let response = agent
        .post(endpoint)
        .send_json(body)
        .with_context(|| format!("could not contact {}", endpoint))?;
    response
        .into_json::<Value>()
        .with_context(|| format!("invalid json reply from {}", endpoint))
}

#[derive(Debug, Deserialize)]
struct ClassificationReply {
    outputs: ClassificationOutputs,
}

#[derive(Debug, Deserialize)]
struct ClassificationOutputs {
    #[serde(rename = "Prediction")]
    prediction: Vec<String>,
    #[serde(rename = "Labels", default)]
    labels: Vec<(String, f32)>,
}

pub(crate) fn parse_classification(reply: &Value) -> Result<DetectionResult> {
    let reply: ClassificationReply =
        serde_json::from_value(reply.clone()).context("unexpected classifier reply")?;
    let label = reply
        .outputs
        .prediction
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("classifier reply has an empty Prediction"))?;
    let confidence = reply
        .outputs
        .labels
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, confidence)| round_confidence(*confidence))
        .unwrap_or(0.0);
    let ranked = reply
        .outputs
        .labels
        .into_iter()
        .map(|(name, confidence)| LabelScore::new(name, round_confidence(confidence)))
        .collect();
    Ok(DetectionResult::new(label, confidence).with_ranked(ranked))
}

#[derive(Debug, Deserialize)]
struct DetectionReply {
    #[serde(rename = "Elapsed", default)]
    elapsed_ms: Option<f64>,
    #[serde(rename = "Items", default)]
    items: Vec<DetectionItem>,
}

#[derive(Debug, Deserialize)]
struct DetectionItem {
    label: String,
    score: f32,
    #[serde(rename = "box")]
    bbox: [f32; 4],
}

/// The first item carrying the target label wins; otherwise the top-scoring
/// item is reported so the result never qualifies.
pub(crate) fn parse_detection(reply: &Value, target_label: &str) -> Result<DetectionResult> {
    let reply: DetectionReply =
        serde_json::from_value(reply.clone()).context("unexpected detector reply")?;
    if let Some(elapsed) = reply.elapsed_ms {
        log::debug!("remote detector took {:.0}ms", elapsed);
    }

    let ranked: Vec<LabelScore> = reply
        .items
        .iter()
        .map(|item| LabelScore::new(item.label.as_str(), round_confidence(item.score)))
        .collect();
    let best = reply
        .items
        .iter()
        .find(|item| item.label == target_label)
        .or_else(|| {
            reply
                .items
                .iter()
                .max_by(|a, b| a.score.total_cmp(&b.score))
        });

    let Some(item) = best else {
        return Ok(DetectionResult::new(NO_DETECTION_LABEL, 0.0));
    };
    let [x1, y1, x2, y2] = item.bbox;
    Ok(
        DetectionResult::new(item.label.as_str(), round_confidence(item.score))
            .with_bbox(BoundingBox::new(x1, y1, x2, y2))
            .with_ranked(ranked),
    )
}
