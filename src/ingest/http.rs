//! HTTP JPEG snapshot camera.
//!
//! Polls a snapshot endpoint (e.g. an ESP32-CAM `/capture` handler or an IP
//! camera's still-image URL) and decodes the JPEG in memory. Polling is paced to
//! `target_fps`: readiness waits for the next frame slot, up to the caller's
//! timeout.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};
use url::Url;

use super::{fit_to, Camera};
use crate::frame::Frame;

const MAX_JPEG_BYTES: u64 = 10 * 1024 * 1024;

pub struct HttpSnapshotCamera {
    url: String,
    width: u32,
    height: u32,
    target_fps: u32,
    agent: ureq::Agent,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

impl HttpSnapshotCamera {
    pub fn new(url: &str, width: u32, height: u32, target_fps: u32) -> Result<Self> {
        let parsed = Url::parse(url).context("parse camera url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build();
        Ok(Self {
            url: url.to_string(),
            width,
            height,
            target_fps,
            agent,
            last_frame_at: None,
            frame_count: 0,
        })
    }
}

impl Camera for HttpSnapshotCamera {
    fn name(&self) -> &str {
        &self.url
    }

    fn ready(&mut self, timeout: Duration) -> bool {
        let Some(last) = self.last_frame_at else {
            return true;
        };
        let due = last + frame_interval(self.target_fps);
        let now = Instant::now();
        if now >= due {
            return true;
        }
        let wait = due - now;
        if wait <= timeout {
            std::thread::sleep(wait);
            true
        } else {
            std::thread::sleep(timeout);
            false
        }
    }

    fn capture(&mut self) -> Result<Frame> {
        let jpeg_bytes = fetch_single_jpeg(&self.agent, &self.url)?;
        let image = image::load_from_memory(&jpeg_bytes)
            .context("decode jpeg")?
            .into_rgb8();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Frame::new(fit_to(image, self.width, self.height), self.frame_count))
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
