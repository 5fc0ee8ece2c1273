//! Pinhole camera with OpenCV-style radial-tangential distortion.
//! Coefficients follow OpenCV order `k1 k2 p1 p2 [k3 [k4 k5 k6]]`; the rational
//! model is used when k4..k6 are present.

use nalgebra::{Matrix3, Vector3};

const UNDISTORT_ITERS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl Distortion {
    /// Builds from an OpenCV coefficient vector of length 4, 5 or 8.
    pub fn from_coeffs(coeffs: &[f64]) -> Option<Self> {
        let mut c = [0.0; 8];
        match coeffs.len() {
            0 | 4 | 5 | 8 => c[..coeffs.len()].copy_from_slice(coeffs),
            _ => return None,
        }
        Some(Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
            k4: c[5],
            k5: c[6],
            k6: c[7],
        })
    }

    #[inline]
    fn radial(&self, r2: f64) -> f64 {
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let num = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let den = 1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6;
        num / den
    }

    #[inline]
    fn tangential(&self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        (
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Applies distortion to normalized image coordinates.
    pub fn distort_normalized(&self, p: [f64; 2]) -> [f64; 2] {
        let [x, y] = p;
        let r2 = x * x + y * y;
        let radial = self.radial(r2);
        let (dx, dy) = self.tangential(x, y, r2);
        [x * radial + dx, y * radial + dy]
    }

    /// Inverts `distort_normalized` by fixed-point iteration.
    pub fn undistort_normalized(&self, distorted: [f64; 2]) -> Option<[f64; 2]> {
        let [xd, yd] = distorted;
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = self.radial(r2);
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let (dx, dy) = self.tangential(x, y, r2);
            let x_next = (xd - dx) / radial;
            let y_next = (yd - dy) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }
            let step = ((x_next - x).powi(2) + (y_next - y).powi(2)).sqrt();
            x = x_next;
            y = y_next;
            if step <= UNDISTORT_EPS {
                break;
            }
        }
        Some([x, y])
    }
}

/// Camera matrix plus distortion, as produced by a chessboard calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub matrix: Matrix3<f64>,
    pub distortion: Distortion,
}

impl CameraModel {
    pub fn new(matrix: Matrix3<f64>, distortion: Distortion) -> Self {
        Self { matrix, distortion }
    }

    /// `true` when the matrix is finite and invertible.
    pub fn is_valid(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite()) && self.matrix.try_inverse().is_some()
    }

    /// Pixel to normalized coordinates through `matrix^-1`.
    pub fn pixel_to_normalized(&self, pixel: [f64; 2]) -> Option<[f64; 2]> {
        let inv = self.matrix.try_inverse()?;
        project(&inv, pixel)
    }

    pub fn normalized_to_pixel(&self, normalized: [f64; 2]) -> Option<[f64; 2]> {
        project(&self.matrix, normalized)
    }

    /// Maps a distorted image pixel to undistorted normalized coordinates.
    pub fn undistort_pixel_normalized(&self, pixel: [f64; 2]) -> Option<[f64; 2]> {
        let distorted = self.pixel_to_normalized(pixel)?;
        self.distortion.undistort_normalized(distorted)
    }
}

#[inline]
pub(crate) fn project(m: &Matrix3<f64>, p: [f64; 2]) -> Option<[f64; 2]> {
    let v = m * Vector3::new(p[0], p[1], 1.0);
    if v[2].abs() < 1e-12 {
        return None;
    }
    let out = [v[0] / v[2], v[1] / v[2]];
    (out[0].is_finite() && out[1].is_finite()).then_some(out)
}
