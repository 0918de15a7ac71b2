#[cfg(feature = "http")]
pub mod remote;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(feature = "http")]
pub use remote::{RemoteClassifier, RemoteDetector};
pub use stub::StubClassifier;

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;
