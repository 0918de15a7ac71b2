//! Camera sources.
//!
//! This module provides the `Camera` capability and its bindings:
//! - Synthetic scenes (`stub://<name>`) for tests and dry runs
//! - HTTP JPEG snapshot cameras (`http(s)://...`, feature: http)
//! - Local image directories replayed in name order (plain path)
//!
//! A source is chosen once at startup from the configured URL scheme. Every
//! source delivers frames at the configured resolution.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::CameraSettings;
use crate::frame::Frame;

pub mod dir;
#[cfg(feature = "http")]
pub mod http;
pub mod stub;

pub use dir::ImageDirCamera;
#[cfg(feature = "http")]
pub use http::HttpSnapshotCamera;
pub use stub::SyntheticCamera;

/// Camera capability consumed by the detection loop.
pub trait Camera: Send {
    fn name(&self) -> &str;

    /// Wait up to `timeout` for the next frame to become available.
    ///
    /// `false` is a timeout, not an error.
    fn ready(&mut self, timeout: Duration) -> bool;

    /// Capture one frame. Errors are acquisition failures.
    fn capture(&mut self) -> Result<Frame>;

    /// Apply exposure/contrast settings.
    fn configure(&mut self, settings: &AcquisitionSettings) -> Result<()> {
        if *settings != AcquisitionSettings::default() {
            log::warn!(
                "camera {} ignores acquisition settings {:?}",
                self.name(),
                settings
            );
        }
        Ok(())
    }
}

/// Exposure and contrast applied at the sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AcquisitionSettings {
    /// Fixed shutter time in microseconds; `None` is automatic exposure.
    #[serde(default)]
    pub shutter_us: Option<u32>,
    /// Contrast adjustment in `[-100, 100]`.
    #[serde(default)]
    pub contrast: i32,
}

impl AcquisitionSettings {
    pub fn validate(&self) -> Result<()> {
        if !(-100..=100).contains(&self.contrast) {
            return Err(anyhow!("contrast must be within [-100, 100] (got {})", self.contrast));
        }
        if self.shutter_us == Some(0) {
            return Err(anyhow!("shutter_us must be > 0 (omit for auto exposure)"));
        }
        Ok(())
    }
}

/// Open the camera named by `settings.source` and apply its acquisition settings.
pub fn open_camera(settings: &CameraSettings) -> Result<Box<dyn Camera>> {
    let source = settings.source.trim();
    let mut camera: Box<dyn Camera> = if let Some(name) = source.strip_prefix("stub://") {
        Box::new(SyntheticCamera::new(name, settings.width, settings.height))
    } else if source.starts_with("http://") || source.starts_with("https://") {
        open_http_camera(settings)?
    } else if source.contains("://") {
        return Err(anyhow!(
            "unsupported camera source '{}'; expected stub://, http(s):// or a local directory",
            source
        ));
    } else {
        Box::new(ImageDirCamera::open(source, settings.width, settings.height)?)
    };
    camera.configure(&settings.acquisition)?;
    log::info!(
        "camera {} opened at {}x{}",
        camera.name(),
        settings.width,
        settings.height
    );
    Ok(camera)
}

#[cfg(feature = "http")]
fn open_http_camera(settings: &CameraSettings) -> Result<Box<dyn Camera>> {
    Ok(Box::new(HttpSnapshotCamera::new(
        &settings.source,
        settings.width,
        settings.height,
        settings.target_fps,
    )?))
}

#[cfg(not(feature = "http"))]
fn open_http_camera(_settings: &CameraSettings) -> Result<Box<dyn Camera>> {
    Err(anyhow!("http cameras require the http feature"))
}

/// Resize to the configured resolution when a source delivers another size.
pub(crate) fn fit_to(image: image::RgbImage, width: u32, height: u32) -> image::RgbImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    log::debug!(
        "resizing {}x{} source image to {}x{}",
        image.width(),
        image.height(),
        width,
        height
    );
    image::imageops::resize(&image, width, height, image::imageops::FilterType::Triangle)
}
