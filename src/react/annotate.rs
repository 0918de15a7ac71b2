//! Annotated evidence copies.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::classify::BoundingBox;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 3;

/// Copy of `image` with `bbox` outlined, clamped to the image bounds.
///
/// Returns `None` when the box lies entirely outside the image.
pub fn outline_detection(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    if bbox.x2 < 0.0 || bbox.y2 < 0.0 || bbox.x1 > max_x || bbox.y1 > max_y {
        return None;
    }
    let x1 = bbox.x1.clamp(0.0, max_x).round() as u32;
    let y1 = bbox.y1.clamp(0.0, max_y).round() as u32;
    let x2 = bbox.x2.clamp(0.0, max_x).round() as u32;
    let y2 = bbox.y2.clamp(0.0, max_y).round() as u32;

    let mut annotated = image.clone();
    for inset in 0..BOX_THICKNESS {
        let left = x1 + inset;
        let top = y1 + inset;
        if left + inset > x2 || top + inset > y2 {
            break;
        }
        let w = x2 - x1 + 1 - 2 * inset;
        let h = y2 - y1 + 1 - 2 * inset;
        draw_hollow_rect_mut(
            &mut annotated,
            Rect::at(left as i32, top as i32).of_size(w, h),
            BOX_COLOR,
        );
    }
    Some(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_edges_are_drawn_inside_the_image() {
        let image = RgbImage::from_pixel(40, 40, Rgb([10, 10, 10]));
        let annotated = outline_detection(&image, &BoundingBox::new(5.0, 8.0, 30.0, 25.0)).unwrap();
        assert_eq!(annotated.get_pixel(5, 8), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(30, 25), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(7, 15), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(15, 15), &Rgb([10, 10, 10]));
        assert_eq!(image.get_pixel(5, 8), &Rgb([10, 10, 10]));
    }

    #[test]
    fn boxes_are_clamped_or_dropped() {
        let image = RgbImage::new(20, 20);
        let clamped = outline_detection(&image, &BoundingBox::new(-5.0, -5.0, 50.0, 50.0)).unwrap();
        assert_eq!(clamped.get_pixel(0, 0), &BOX_COLOR);
        assert_eq!(clamped.get_pixel(19, 19), &BOX_COLOR);
        assert!(outline_detection(&image, &BoundingBox::new(25.0, 25.0, 30.0, 30.0)).is_none());
    }
}
