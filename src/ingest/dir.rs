//! Local image directory source.
//!
//! Replays `.jpg`, `.jpeg` and `.png` files from a local directory in name
//! order, cycling back to the first file after the last. Useful for bench
//! testing a classifier against recorded scenes.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{fit_to, Camera};
use crate::frame::Frame;

pub struct ImageDirCamera {
    name: String,
    files: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
    sequence: u64,
}

impl ImageDirCamera {
    pub fn open(dir: impl AsRef<Path>, width: u32, height: u32) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("read image directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no .jpg/.jpeg/.png images in {}", dir.display()));
        }
        log::info!(
            "ImageDirCamera: replaying {} images from {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            name: dir.display().to_string(),
            files,
            next: 0,
            width,
            height,
            sequence: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Camera for ImageDirCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn capture(&mut self) -> Result<Frame> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .into_rgb8();
        self.sequence += 1;
        Ok(Frame::new(fit_to(image, self.width, self.height), self.sequence))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn replays_images_in_order_and_cycles() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(40, 30, Rgb([10, 10, 10]))
            .save(dir.path().join("a.png"))
            .unwrap();
        RgbImage::from_pixel(80, 60, Rgb([200, 200, 200]))
            .save(dir.path().join("b.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let mut camera = ImageDirCamera::open(dir.path(), 40, 30).unwrap();
        assert_eq!(camera.len(), 2);

        let first = camera.capture().unwrap();
        assert_eq!(first.image().get_pixel(0, 0), &Rgb([10, 10, 10]));
        let second = camera.capture().unwrap();
        assert_eq!((second.width(), second.height()), (40, 30));
        assert_eq!(second.image().get_pixel(5, 5), &Rgb([200, 200, 200]));
        let third = camera.capture().unwrap();
        assert_eq!(third.image().get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(third.sequence(), 3);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageDirCamera::open(dir.path(), 40, 30).is_err());
    }
}
