//! Synthetic camera for tests and dry runs.
//!
//! Renders a textured background and, with a configurable probability, a bright
//! square "target" at a random position. The RNG is seeded from the source name
//! so runs are reproducible.

use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::{AcquisitionSettings, Camera};
use crate::frame::Frame;

const DEFAULT_TARGET_PROBABILITY: f64 = 0.25;

pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    sequence: u64,
    rng: StdRng,
    target_probability: f64,
    target_size: u32,
    acquisition: AcquisitionSettings,
}

impl SyntheticCamera {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        let seed = name
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| (acc ^ b as u64).wrapping_mul(0x100_0000_01b3));
        Self {
            name: format!("stub://{}", name),
            width,
            height,
            sequence: 0,
            rng: StdRng::seed_from_u64(seed),
            target_probability: DEFAULT_TARGET_PROBABILITY,
            target_size: (width.min(height) / 10).max(1),
            acquisition: AcquisitionSettings::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Probability in `[0, 1]` that a frame contains a target.
    pub fn with_target_probability(mut self, probability: f64) -> Self {
        self.target_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn acquisition(&self) -> AcquisitionSettings {
        self.acquisition
    }

    fn render(&mut self) -> RgbImage {
        let phase = (self.sequence % 128) as u32;
        let contrast = self.acquisition.contrast;
        let mut image = RgbImage::from_fn(self.width, self.height, |x, y| {
            let level = (((x + y + phase) % 128) as i32 + 32 + contrast).clamp(0, 180) as u8;
            Rgb([level / 2, level, level / 2])
        });

        if self.rng.gen_bool(self.target_probability) {
            let size = self.target_size;
            let left = self.rng.gen_range(0..=self.width - size);
            let top = self.rng.gen_range(0..=self.height - size);
            for y in top..top + size {
                for x in left..left + size {
                    image.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        image
    }
}

impl Camera for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn capture(&mut self) -> Result<Frame> {
        self.sequence += 1;
        let image = self.render();
        Ok(Frame::new(image, self.sequence))
    }

    fn configure(&mut self, settings: &AcquisitionSettings) -> Result<()> {
        settings.validate()?;
        self.acquisition = *settings;
        log::info!("{}: acquisition set to {:?}", self.name, settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_white(frame: &Frame) -> usize {
        frame
            .image()
            .pixels()
            .filter(|p| p.0 == [255, 255, 255])
            .count()
    }

    #[test]
    fn frames_have_requested_size_and_sequence() {
        let mut camera = SyntheticCamera::new("test", 120, 80);
        let first = camera.capture().unwrap();
        let second = camera.capture().unwrap();
        assert_eq!((first.width(), first.height()), (120, 80));
        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
    }

    #[test]
    fn target_probability_controls_bright_square() {
        let mut always = SyntheticCamera::new("always", 100, 100).with_target_probability(1.0);
        let frame = always.capture().unwrap();
        assert_eq!(count_white(&frame), 100);

        let mut never = SyntheticCamera::new("never", 100, 100).with_target_probability(0.0);
        let frame = never.capture().unwrap();
        assert_eq!(count_white(&frame), 0);
    }

    #[test]
    fn same_seed_renders_same_scene() {
        let mut a = SyntheticCamera::new("a", 64, 64).with_seed(7).with_target_probability(0.5);
        let mut b = SyntheticCamera::new("b", 64, 64).with_seed(7).with_target_probability(0.5);
        for _ in 0..5 {
            assert_eq!(a.capture().unwrap().image(), b.capture().unwrap().image());
        }
    }

    #[test]
    fn configure_validates_and_stores_settings() {
        let mut camera = SyntheticCamera::new("cfg", 32, 32);
        let settings = AcquisitionSettings {
            shutter_us: Some(2000),
            contrast: 10,
        };
        camera.configure(&settings).unwrap();
        assert_eq!(camera.acquisition(), settings);
        assert!(camera
            .configure(&AcquisitionSettings {
                shutter_us: None,
                contrast: -300,
            })
            .is_err());
    }
}
