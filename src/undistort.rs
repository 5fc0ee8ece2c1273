//! Lens undistortion.
//! Built once from the camera model and the initialization image size: computes the
//! free-scaling (alpha = 1) camera matrix, the valid-pixel ROI and a remap table.
//! Per frame it is a single bilinear remap cropped to the ROI.

use crate::camera::{project, CameraModel};
use crate::error::{Result, VisionError};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into_with, Interpolation};
use log::debug;
use nalgebra::Matrix3;

/// Sample grid used to bound the undistorted image
const GRID: usize = 9;

/// Valid pixel region of the undistorted image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub struct Undistorter {
    frame_size: (u32, u32),
    new_camera: Matrix3<f64>,
    roi: Roi,
    /// Source pixel for every ROI pixel, row-major
    map: Vec<(f32, f32)>,
}

impl Undistorter {
    /// Precomputes the remap for frames of exactly `frame_size`.
    pub fn new(camera: &CameraModel, frame_size: (u32, u32)) -> Result<Self> {
        let (w, h) = frame_size;
        if w < 2 || h < 2 {
            return Err(VisionError::InvalidCamera {
                reason: format!("frame size {}x{} too small", w, h),
            });
        }

        let (new_camera, roi) = optimal_new_camera(camera, frame_size)?;
        let new_inv = new_camera.try_inverse().ok_or_else(|| VisionError::InvalidCamera {
            reason: "optimal camera matrix is singular".to_string(),
        })?;

        let mut map = Vec::with_capacity((roi.width * roi.height) as usize);
        for v in 0..roi.height {
            for u in 0..roi.width {
                let pixel = [(u + roi.x) as f64, (v + roi.y) as f64];
                let src = project(&new_inv, pixel)
                    .map(|n| camera.distortion.distort_normalized(n))
                    .and_then(|d| camera.normalized_to_pixel(d))
                    .map(|p| (p[0] as f32, p[1] as f32))
                    // Outside the image: sampled as black
                    .unwrap_or((-1.0, -1.0));
                map.push(src);
            }
        }

        debug!(
            "Undistorter ready: frame {}x{}, roi {:?}",
            frame_size.0, frame_size.1, roi
        );
        Ok(Self {
            frame_size,
            new_camera,
            roi,
            map,
        })
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn new_camera_matrix(&self) -> &Matrix3<f64> {
        &self.new_camera
    }

    /// Lens-corrected copy of `frame`, cropped to the ROI.
    pub fn undistort(&self, frame: &RgbImage) -> Result<RgbImage> {
        if frame.dimensions() != self.frame_size {
            return Err(VisionError::FrameSizeMismatch {
                expected: self.frame_size,
                actual: frame.dimensions(),
            });
        }

        let width = self.roi.width as usize;
        let mut out = RgbImage::new(self.roi.width, self.roi.height);
        warp_into_with(
            frame,
            |x, y| self.map[y as usize * width + x as usize],
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
            &mut out,
        );
        Ok(out)
    }
}

/// Camera matrix keeping every source pixel (alpha = 1) and the ROI of valid pixels in it.
fn optimal_new_camera(camera: &CameraModel, frame_size: (u32, u32)) -> Result<(Matrix3<f64>, Roi)> {
    let (w, h) = (frame_size.0 as f64, frame_size.1 as f64);

    // Step 1: undistort a grid of points spanning the frame
    let mut outer = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
    let mut inner = [f64::NEG_INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::INFINITY];
    for i in 0..GRID {
        for j in 0..GRID {
            let px = j as f64 * (w - 1.0) / (GRID - 1) as f64;
            let py = i as f64 * (h - 1.0) / (GRID - 1) as f64;
            let [x, y] = camera.undistort_pixel_normalized([px, py]).ok_or_else(|| {
                VisionError::InvalidCamera {
                    reason: format!("cannot undistort pixel ({:.0}, {:.0})", px, py),
                }
            })?;

            outer[0] = outer[0].min(x);
            outer[1] = outer[1].min(y);
            outer[2] = outer[2].max(x);
            outer[3] = outer[3].max(y);
            if j == 0 {
                inner[0] = inner[0].max(x);
            }
            if j == GRID - 1 {
                inner[2] = inner[2].min(x);
            }
            if i == 0 {
                inner[1] = inner[1].max(y);
            }
            if i == GRID - 1 {
                inner[3] = inner[3].min(y);
            }
        }
    }

    let (ow, oh) = (outer[2] - outer[0], outer[3] - outer[1]);
    if ow <= 0.0 || oh <= 0.0 {
        return Err(VisionError::InvalidCamera {
            reason: "undistorted frame has no extent".to_string(),
        });
    }

    // Step 2: scale so the outer rectangle fills the frame
    let fx = (w - 1.0) / ow;
    let fy = (h - 1.0) / oh;
    let cx = -fx * outer[0];
    let cy = -fy * outer[1];
    let new_camera = Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0);

    // Step 3: the inner rectangle in new pixels is the valid region
    let x0 = (inner[0] * fx + cx).max(0.0);
    let y0 = (inner[1] * fy + cy).max(0.0);
    let x1 = (inner[2] * fx + cx).min(w);
    let y1 = (inner[3] * fy + cy).min(h);
    // Tolerance keeps float noise from eating a whole pixel row or column
    let roi_x = (x0 - 1e-6).ceil();
    let roi_y = (y0 - 1e-6).ceil();
    let roi = Roi {
        x: roi_x as u32,
        y: roi_y as u32,
        width: (x1 - roi_x + 1e-6).floor().max(0.0) as u32,
        height: (y1 - roi_y + 1e-6).floor().max(0.0) as u32,
    };
    if roi.width == 0 || roi.height == 0 {
        return Err(VisionError::InvalidCamera {
            reason: "no valid pixels remain after undistortion".to_string(),
        });
    }
    Ok((new_camera, roi))
}
