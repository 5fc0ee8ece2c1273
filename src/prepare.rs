//! Frame preparation: undistort, rectify, crop with border.
//! The only stage the detection loop calls on raw frames.

use crate::calibration::CalibrationContext;
use crate::config::BoardConfig;
use crate::error::{Result, VisionError};
use crate::rectify::{CanonicalSquare, PerspectiveRectifier};
use crate::undistort::Undistorter;
use image::RgbImage;

/// Top-down board view, `board_px + 2 * border_px` on each side.
pub type NormalizedFrame = RgbImage;

pub struct FramePreparer {
    undistorter: Undistorter,
    rectifier: PerspectiveRectifier,
    side: u32,
}

impl FramePreparer {
    /// Fails on missing or degenerate corners instead of producing an undefined warp.
    pub fn new(ctx: &CalibrationContext, board: &BoardConfig) -> Result<Self> {
        let corners = ctx.corners.as_ref().ok_or(VisionError::MissingCorners)?;
        corners.validate()?;

        let undistorter = Undistorter::new(&ctx.camera, ctx.frame_size)?;
        let square = CanonicalSquare {
            origin: board.border_px as f32,
            side: board.board_px() as f32,
        };
        let rectifier = PerspectiveRectifier::new(corners, square)?;
        Ok(Self {
            undistorter,
            rectifier,
            side: board.frame_side(),
        })
    }

    pub fn undistorter(&self) -> &Undistorter {
        &self.undistorter
    }

    pub fn rectifier(&self) -> &PerspectiveRectifier {
        &self.rectifier
    }

    /// Side of every `NormalizedFrame` this preparer produces.
    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn prepare(&self, frame: &RgbImage) -> Result<NormalizedFrame> {
        let undistorted = self.undistorter.undistort(frame)?;
        Ok(self.rectifier.rectify(&undistorted, self.side, self.side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::BoardCorners;
    use crate::camera::{CameraModel, Distortion};
    use image::Rgb;
    use nalgebra::{Matrix3, Point2};

    fn context(corners: Option<BoardCorners>) -> CalibrationContext {
        CalibrationContext {
            camera: CameraModel::new(
                Matrix3::new(600.0, 0.0, 160.0, 0.0, 600.0, 120.0, 0.0, 0.0, 1.0),
                Distortion::default(),
            ),
            corners,
            frame_size: (320, 240),
        }
    }

    fn small_board() -> BoardConfig {
        BoardConfig {
            board_size_mm: 100.0,
            px_per_mm: 2.0,
            border_px: 10,
        }
    }

    #[test]
    fn test_prepare_outputs_normalized_size() {
        let corners = BoardCorners::new([
            Point2::new(60.0, 20.0),
            Point2::new(260.0, 20.0),
            Point2::new(60.0, 220.0),
            Point2::new(260.0, 220.0),
        ]);
        let preparer = FramePreparer::new(&context(Some(corners)), &small_board()).unwrap();

        let frame = RgbImage::from_pixel(320, 240, Rgb([200, 200, 200]));
        let normalized = preparer.prepare(&frame).unwrap();
        assert_eq!(normalized.dimensions(), (220, 220));
        let center = normalized.get_pixel(110, 110);
        assert!(center.0.iter().all(|&c| (199..=200).contains(&c)), "{:?}", center);
    }

    #[test]
    fn test_missing_corners_is_fatal() {
        let err = FramePreparer::new(&context(None), &small_board()).err().unwrap();
        assert!(matches!(err, VisionError::MissingCorners));
    }

    #[test]
    fn test_degenerate_corners_are_rejected() {
        let p = Point2::new(10.0, 10.0);
        let err = FramePreparer::new(&context(Some(BoardCorners::new([p; 4]))), &small_board())
            .err()
            .unwrap();
        assert!(matches!(err, VisionError::DegenerateCorners { .. }));
    }

    #[test]
    fn test_wrong_frame_size_is_fatal() {
        let corners = BoardCorners::new([
            Point2::new(60.0, 20.0),
            Point2::new(260.0, 20.0),
            Point2::new(60.0, 220.0),
            Point2::new(260.0, 220.0),
        ]);
        let preparer = FramePreparer::new(&context(Some(corners)), &small_board()).unwrap();
        let frame = RgbImage::new(640, 480);
        assert!(matches!(
            preparer.prepare(&frame),
            Err(VisionError::FrameSizeMismatch { .. })
        ));
    }
}
