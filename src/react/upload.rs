//! Cloud copies of evidence tiles.

use anyhow::Result;
use image::RgbImage;

use crate::config::UploadSettings;

/// Uploads an image and returns a URL where it can be viewed.
pub trait Uploader: Send {
    fn name(&self) -> &str;

    fn upload(&mut self, image: &RgbImage, description: &str) -> Result<String>;
}

/// Uploader for the configured `upload` section, if any.
pub fn build_uploader(settings: Option<&UploadSettings>) -> Result<Option<Box<dyn Uploader>>> {
    match settings {
        None => Ok(None),
        Some(settings) => build_imgbb(settings).map(Some),
    }
}

#[cfg(feature = "http")]
fn build_imgbb(settings: &UploadSettings) -> Result<Box<dyn Uploader>> {
    Ok(Box::new(imgbb::ImgbbUploader::new(settings.clone())?))
}

#[cfg(not(feature = "http"))]
fn build_imgbb(_settings: &UploadSettings) -> Result<Box<dyn Uploader>> {
    Err(anyhow::anyhow!("image upload requires the http feature"))
}

#[cfg(feature = "http")]
pub mod imgbb {
    use anyhow::{anyhow, Context, Result};
    use image::RgbImage;
    use serde::Deserialize;
    use serde_json::Value;
    use std::time::Duration;
    use url::Url;

    use super::Uploader;
    use crate::config::UploadSettings;
    use crate::storage::image_to_base64_png;

    /// imgbb form upload; images expire after the configured time.
    pub struct ImgbbUploader {
        settings: UploadSettings,
        agent: ureq::Agent,
    }

    #[derive(Debug, Deserialize)]
    struct ImgbbReply {
        data: ImgbbData,
    }

    #[derive(Debug, Deserialize)]
    struct ImgbbData {
        url_viewer: String,
        #[serde(default)]
        url: Option<String>,
    }

    impl ImgbbUploader {
        pub fn new(settings: UploadSettings) -> Result<Self> {
            Url::parse(&settings.url)
                .with_context(|| format!("invalid upload url '{}'", settings.url))?;
            Ok(Self {
                settings,
                agent: ureq::AgentBuilder::new()
                    .timeout(Duration::from_secs(30))
                    .build(),
            })
        }
    }

    pub(crate) fn parse_reply(reply: Value) -> Result<String> {
        let reply: ImgbbReply =
            serde_json::from_value(reply).context("unexpected imgbb reply")?;
        if reply.data.url_viewer.is_empty() {
            return Err(anyhow!("imgbb reply has no viewer url"));
        }
        if let Some(url) = &reply.data.url {
            log::debug!("imgbb direct image url {}", url);
        }
        Ok(reply.data.url_viewer)
    }

    impl Uploader for ImgbbUploader {
        fn name(&self) -> &str {
            "imgbb"
        }

        fn upload(&mut self, image: &RgbImage, description: &str) -> Result<String> {
            let encoded = image_to_base64_png(image)?;
            let expiration = self.settings.expiration.as_secs().to_string();
            let reply: Value = self
                .agent
                .post(&self.settings.url)
                .send_form(&[
                    ("key", self.settings.api_key.as_str()),
                    ("image", encoded.as_str()),
                    ("name", description),
                    ("expiration", expiration.as_str()),
                ])
                .with_context(|| format!("imgbb upload to {} failed", self.settings.url))?
                .into_json()
                .context("invalid imgbb reply")?;
            parse_reply(reply)
        }
    }

}
