//! Perspective rectification.
//! Maps the four calibrated board corners onto a fixed square in the normalized frame
//! and warps with bilinear interpolation. Corner sanity is the caller's job
//! (see `BoardCorners::validate`); near-degenerate corners give an unstable transform.

use crate::calibration::{BoardCorners, CornerSlot};
use crate::error::{Result, VisionError};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Point2;

/// Where the board square lands in the normalized frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanonicalSquare {
    /// Offset of the upper-left corner on both axes
    pub origin: f32,
    /// Side length in pixels
    pub side: f32,
}

impl CanonicalSquare {
    pub fn corner(&self, slot: CornerSlot) -> (f32, f32) {
        let (o, s) = (self.origin, self.origin + self.side);
        match slot {
            CornerSlot::UpperLeft => (o, o),
            CornerSlot::UpperRight => (s, o),
            CornerSlot::LowerLeft => (o, s),
            CornerSlot::LowerRight => (s, s),
        }
    }
}

pub struct PerspectiveRectifier {
    image_to_canvas: Projection,
}

impl PerspectiveRectifier {
    pub fn new(corners: &BoardCorners, square: CanonicalSquare) -> Result<Self> {
        let from = CornerSlot::ALL.map(|slot| {
            let p = corners.get(slot);
            (p.x as f32, p.y as f32)
        });
        let to = CornerSlot::ALL.map(|slot| square.corner(slot));

        let image_to_canvas = Projection::from_control_points(from, to)
            .ok_or_else(|| VisionError::degenerate("no projective transform through the corners"))?;
        Ok(Self { image_to_canvas })
    }

    /// Undistorted-image pixel to normalized-frame pixel.
    pub fn map_point(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = self.image_to_canvas * (p.x as f32, p.y as f32);
        Point2::new(x as f64, y as f64)
    }

    /// Warps `frame` into a `width` x `height` canvas anchored at the normalized-frame origin.
    pub fn rectify(&self, frame: &RgbImage, width: u32, height: u32) -> RgbImage {
        let mut out = RgbImage::new(width, height);
        warp_into(
            frame,
            &self.image_to_canvas,
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
            &mut out,
        );
        out
    }
}
