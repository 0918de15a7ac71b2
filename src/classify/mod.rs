//! Tile classification.
//!
//! A `Classifier` turns one tile into a `DetectionResult`. The backend is picked
//! once at startup from the configured `ClassifierKind`.

mod backend;
pub mod backends;
mod factory;
mod result;

pub use backend::Classifier;
pub use backends::StubClassifier;
pub use factory::{build_classifier, ClassifierKind};
pub use result::{round_confidence, BoundingBox, DetectionResult, LabelScore};
