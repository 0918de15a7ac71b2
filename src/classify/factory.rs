use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use super::backend::Classifier;
use super::backends::StubClassifier;
use crate::config::ModelSettings;

/// Classifier backends selectable from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Brightness heuristic, no model.
    Stub,
    /// Remote image classifier over HTTP (feature: http).
    Remote,
    /// Remote object detector over HTTP (feature: http).
    RemoteDetector,
    /// Local ONNX model (feature: backend-tract).
    Tract,
}

impl ClassifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierKind::Stub => "stub",
            ClassifierKind::Remote => "remote",
            ClassifierKind::RemoteDetector => "remote_detector",
            ClassifierKind::Tract => "tract",
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifierKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(ClassifierKind::Stub),
            "remote" => Ok(ClassifierKind::Remote),
            "remote_detector" | "remote-detector" => Ok(ClassifierKind::RemoteDetector),
            "tract" => Ok(ClassifierKind::Tract),
            other => Err(anyhow!(
                "unknown classifier backend '{}' (expected stub, remote, remote_detector or tract)",
                other
            )),
        }
    }
}

/// Resolve the configured backend once at startup.
pub fn build_classifier(settings: &ModelSettings) -> Result<Box<dyn Classifier>> {
    let mut classifier: Box<dyn Classifier> = match settings.backend {
        ClassifierKind::Stub => Box::new(StubClassifier::brightness(&settings.target_label)),
        ClassifierKind::Remote => build_remote(settings, false)?,
        ClassifierKind::RemoteDetector => build_remote(settings, true)?,
        ClassifierKind::Tract => build_tract(settings)?,
    };
    classifier.warm_up()?;
    log::info!(
        "classifier {} ready (target {}, threshold {:.2})",
        classifier.name(),
        settings.target_label,
        settings.confidence_threshold
    );
    Ok(classifier)
}

#[cfg(feature = "http")]
fn build_remote(settings: &ModelSettings, detector: bool) -> Result<Box<dyn Classifier>> {
    use super::backends::{RemoteClassifier, RemoteDetector};

    let url = settings
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("model backend {} requires model.url", settings.backend))?;
    if detector {
        Ok(Box::new(RemoteDetector::new(url, &settings.target_label)?))
    } else {
        Ok(Box::new(RemoteClassifier::new(url)?))
    }
}

#[cfg(not(feature = "http"))]
fn build_remote(settings: &ModelSettings, _detector: bool) -> Result<Box<dyn Classifier>> {
    Err(anyhow!(
        "model backend {} requires the http feature",
        settings.backend
    ))
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &ModelSettings) -> Result<Box<dyn Classifier>> {
    use super::backends::TractClassifier;

    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("model backend tract requires model.model_path"))?;
    Ok(Box::new(TractClassifier::new(
        model_path,
        settings.labels_path.as_deref(),
        settings.input_width,
        settings.input_height,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &ModelSettings) -> Result<Box<dyn Classifier>> {
    Err(anyhow!(
        "model backend tract requires the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_names() {
        assert_eq!("stub".parse::<ClassifierKind>().unwrap(), ClassifierKind::Stub);
        assert_eq!(
            "Remote-Detector".parse::<ClassifierKind>().unwrap(),
            ClassifierKind::RemoteDetector
        );
        assert!("lobe".parse::<ClassifierKind>().is_err());
    }

    #[test]
    fn kinds_deserialize_snake_case() {
        let kind: ClassifierKind = serde_json::from_str("\"remote_detector\"").unwrap();
        assert_eq!(kind, ClassifierKind::RemoteDetector);
        assert_eq!(kind.to_string(), "remote_detector");
        assert!(serde_json::from_str::<ClassifierKind>("\"magic\"").is_err());
    }

    #[test]
    fn stub_backend_builds_without_model() {
        let classifier = build_classifier(&ModelSettings::default()).unwrap();
        assert_eq!(classifier.name(), "stub");
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_without_feature_is_a_startup_error() {
        let settings = ModelSettings {
            backend: ClassifierKind::Tract,
            model_path: Some("model.onnx".into()),
            ..ModelSettings::default()
        };
        assert!(build_classifier(&settings).is_err());
    }
}
