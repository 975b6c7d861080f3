use ab_glyph::{FontVec, PxScale};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::face::FaceBox;
use crate::provider::ChannelOrder;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_HEIGHT: i32 = 35;
const TEXT_SCALE: f32 = 24.0;

/// Resize by a linear `factor`, never below one pixel per side.
pub fn downscale(img: &RgbImage, factor: f32) -> RgbImage {
    let w = ((img.width() as f32 * factor).round() as u32).max(1);
    let h = ((img.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(img, w, h, FilterType::Triangle)
}

/// Reorder the channels of an RGB buffer into `order`.
pub fn to_channel_order(img: &RgbImage, order: ChannelOrder) -> RgbImage {
    match order {
        ChannelOrder::Rgb => img.clone(),
        ChannelOrder::Bgr => {
            let mut out = img.clone();
            for px in out.pixels_mut() {
                px.0.swap(0, 2);
            }
            out
        }
    }
}

/// Draws face boxes with a name strip along their bottom edge.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Load the label font. Labels are drawn without text when it cannot be read.
    pub fn load(font_path: &Path) -> Self {
        let font = std::fs::read(font_path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self { font: Some(font) },
            Err(e) => {
                log::warn!(
                    "label font {} unavailable ({}), drawing labels without text",
                    font_path.display(),
                    e
                );
                Self::without_text()
            }
        }
    }

    pub fn without_text() -> Self {
        Self { font: None }
    }

    pub fn has_text(&self) -> bool {
        self.font.is_some()
    }

    /// Draw one face. `face` is in the pixel space of `frame`.
    pub fn draw(&self, frame: &mut RgbImage, face: &FaceBox, label: &str) {
        let (w, h) = (face.width(), face.height());
        if w <= 0 || h <= 0 {
            return;
        }

        // 2px outline
        draw_hollow_rect_mut(
            frame,
            Rect::at(face.left, face.top).of_size(w as u32, h as u32),
            BOX_COLOR,
        );
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(
                frame,
                Rect::at(face.left + 1, face.top + 1).of_size(w as u32 - 2, h as u32 - 2),
                BOX_COLOR,
            );
        }

        let strip_top = face.bottom - LABEL_HEIGHT;
        draw_filled_rect_mut(
            frame,
            Rect::at(face.left, strip_top).of_size(w as u32, LABEL_HEIGHT as u32),
            BOX_COLOR,
        );

        if let Some(font) = &self.font {
            draw_text_mut(
                frame,
                TEXT_COLOR,
                face.left + 6,
                strip_top + (LABEL_HEIGHT - TEXT_SCALE as i32) / 2,
                PxScale::from(TEXT_SCALE),
                font,
                label,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_quarter() {
        let img = RgbImage::new(640, 480);
        assert_eq!(downscale(&img, 0.25).dimensions(), (160, 120));
        assert_eq!(downscale(&RgbImage::new(2, 2), 0.25).dimensions(), (1, 1));
    }

    #[test]
    fn test_channel_swap() {
        let img = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        assert_eq!(to_channel_order(&img, ChannelOrder::Bgr).get_pixel(1, 1), &Rgb([3, 2, 1]));
        assert_eq!(to_channel_order(&img, ChannelOrder::Rgb).get_pixel(1, 1), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_draw_box_and_strip() {
        let mut frame = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let annotator = Annotator::without_text();
        annotator.draw(&mut frame, &FaceBox::new(10, 60, 70, 20), "alice");

        // Outline corner and inner outline
        assert_eq!(frame.get_pixel(20, 10), &BOX_COLOR);
        assert_eq!(frame.get_pixel(21, 11), &BOX_COLOR);
        // Interior above the strip is untouched
        assert_eq!(frame.get_pixel(40, 20), &Rgb([0, 0, 0]));
        // Strip fills the bottom 35 rows inside the box
        assert_eq!(frame.get_pixel(40, 50), &BOX_COLOR);
        // Outside the box
        assert_eq!(frame.get_pixel(80, 80), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_clips_and_ignores_degenerate() {
        let mut frame = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        let annotator = Annotator::without_text();
        annotator.draw(&mut frame, &FaceBox::new(-20, 80, 30, -10), "edge");
        assert_eq!(frame.get_pixel(0, 29), &BOX_COLOR);

        let mut untouched = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        annotator.draw(&mut untouched, &FaceBox::new(5, 5, 5, 5), "none");
        assert!(untouched.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_missing_font_falls_back() {
        let annotator = Annotator::load(Path::new("/nonexistent/font.ttf"));
        assert!(!annotator.has_text());
    }
}
