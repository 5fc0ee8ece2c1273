//! Color segmentation of the normalized frame into black-piece and white-piece masks.
//! Luminance thresholds pick the candidates; HSV boxes suppress blue surfaces that
//! read as black and yellow surfaces that read as white.
//! The thresholds are fixed for one physical setup and not adaptive.

use crate::config::SegmentationConfig;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use palette::{FromColor, Hsv, Srgb};

/// Foreground value in a mask
pub const MASK_ON: u8 = 255;

pub struct PieceMasks {
    pub black: GrayImage,
    pub white: GrayImage,
}

pub struct ColorSegmenter {
    config: SegmentationConfig,
}

impl ColorSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    /// Blurs `frame` and thresholds it into the two piece masks.
    pub fn segment(&self, frame: &RgbImage) -> PieceMasks {
        let blurred = gaussian_blur_f32(frame, self.config.blur_sigma);
        let (w, h) = blurred.dimensions();
        let mut black = GrayImage::new(w, h);
        let mut white = GrayImage::new(w, h);

        for (x, y, &pixel) in blurred.enumerate_pixels() {
            let gray = luminance(pixel);
            let hsv = hsv_opencv(pixel);
            if self.is_black_candidate(gray, hsv) {
                black.put_pixel(x, y, Luma([MASK_ON]));
            }
            if self.is_white_candidate(gray, hsv) {
                white.put_pixel(x, y, Luma([MASK_ON]));
            }
        }
        PieceMasks { black, white }
    }

    pub fn is_black_candidate(&self, gray: u8, hsv: [u8; 3]) -> bool {
        gray <= self.config.black_threshold && !self.config.blue_hsv.contains(hsv)
    }

    pub fn is_white_candidate(&self, gray: u8, hsv: [u8; 3]) -> bool {
        gray >= self.config.white_threshold && !self.config.yellow_hsv.contains(hsv)
    }
}

/// BT.601 luma, the weights OpenCV uses for RGB to gray.
pub fn luminance(p: Rgb<u8>) -> u8 {
    let [r, g, b] = p.0;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// HSV in OpenCV 8-bit ranges: H 0-179 (degrees / 2, wrapping at 360), S and V 0-255.
pub fn hsv_opencv(p: Rgb<u8>) -> [u8; 3] {
    let rgb = Srgb::new(p[0], p[1], p[2]).into_format::<f32>();
    let hsv: Hsv = Hsv::from_color(rgb);
    let hue = hsv.hue.into_positive_degrees();
    [
        ((hue / 2.0).round() as u32 % 180) as u8,
        (hsv.saturation * 255.0).round().clamp(0.0, 255.0) as u8,
        (hsv.value * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}
