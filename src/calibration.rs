//! Calibration store.
//! Reads the camera calibration (`calibration_data.txt`) and the board corners
//! (`board_corners.txt`), both plain whitespace-separated numeric text as written by numpy.
//! The initialization image only contributes its size: every frame must match it.
//! Everything ends up in one immutable `CalibrationContext` built at startup.

use crate::camera::{CameraModel, Distortion};
use crate::config::PathsConfig;
use crate::error::{Result, VisionError};
use log::{info, warn};
use nalgebra::{Matrix3, Point2};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Minimum separation between two corners, in pixels
const MIN_CORNER_DISTANCE: f64 = 1.0;
/// Minimum |cross product| of adjacent edges, in squared pixels
const MIN_TURN_AREA: f64 = 1e-6;

/// Corners in the order they are met walking around the board
const CORNER_RING: [CornerSlot; 4] = [
    CornerSlot::UpperLeft,
    CornerSlot::UpperRight,
    CornerSlot::LowerRight,
    CornerSlot::LowerLeft,
];

/// Board corner slots, in the order they are calibrated and stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CornerSlot {
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl CornerSlot {
    pub const ALL: [CornerSlot; 4] = [
        CornerSlot::UpperLeft,
        CornerSlot::UpperRight,
        CornerSlot::LowerLeft,
        CornerSlot::LowerRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Text shown to the user when this corner has to be picked.
    pub fn instruction(self) -> &'static str {
        match self {
            CornerSlot::UpperLeft => "Pick upper left corner",
            CornerSlot::UpperRight => "Pick upper right corner",
            CornerSlot::LowerLeft => "Pick lower left corner",
            CornerSlot::LowerRight => "Pick lower right corner",
        }
    }
}

impl fmt::Display for CornerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CornerSlot::UpperLeft => "upper-left",
            CornerSlot::UpperRight => "upper-right",
            CornerSlot::LowerLeft => "lower-left",
            CornerSlot::LowerRight => "lower-right",
        };
        f.write_str(name)
    }
}

/// Board corners in undistorted-image pixels, ordered UL, UR, LL, LR.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardCorners {
    pub points: [Point2<f64>; 4],
}

impl BoardCorners {
    pub fn new(points: [Point2<f64>; 4]) -> Self {
        Self { points }
    }

    pub fn get(&self, slot: CornerSlot) -> Point2<f64> {
        self.points[slot.index()]
    }

    /// Checks the corners are distinct and walk a convex quadrilateral UL -> UR -> LR -> LL.
    pub fn validate(&self) -> Result<()> {
        for i in 0..4 {
            for j in (i + 1)..4 {
                if (self.points[i] - self.points[j]).norm() < MIN_CORNER_DISTANCE {
                    return Err(VisionError::degenerate(format!(
                        "{} and {} coincide",
                        CornerSlot::ALL[i],
                        CornerSlot::ALL[j]
                    )));
                }
            }
        }

        let ring = CORNER_RING.map(|slot| self.get(slot));
        // Image y points down, so UL -> UR -> LR -> LL turns clockwise on screen: every
        // cross product is positive. A negative one means a mirrored or crossed pick.
        for k in 0..4 {
            let a = ring[k];
            let b = ring[(k + 1) % 4];
            let c = ring[(k + 2) % 4];
            let cross = (b - a).perp(&(c - b));
            if cross.abs() < MIN_TURN_AREA {
                return Err(VisionError::degenerate("three corners are collinear"));
            }
            if cross < 0.0 {
                return Err(VisionError::degenerate(format!(
                    "corners turn the wrong way at {}; expected a convex UL, UR, LR, LL ring",
                    CORNER_RING[(k + 1) % 4]
                )));
            }
        }
        Ok(())
    }

    /// Loads corners; a missing file means the board is not calibrated yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let rows = match read_numeric_rows(path) {
            Ok(rows) => rows,
            Err(VisionError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                warn!("{} not found, board corners are uncalibrated", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if rows.len() != 4 || rows.iter().any(|r| r.len() != 2) {
            return Err(VisionError::parse(
                path,
                format!("expected 4 rows of 2 values, got {:?}", row_shape(&rows)),
            ));
        }
        let mut points = [Point2::origin(); 4];
        for (point, row) in points.iter_mut().zip(&rows) {
            *point = Point2::new(row[0], row[1]);
        }
        Ok(Some(Self::new(points)))
    }

    /// Writes the corners in numpy `savetxt` layout, overwriting any previous calibration.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        for p in &self.points {
            text.push_str(&format!("{} {}\n", numpy_sci(p.x), numpy_sci(p.y)));
        }
        fs::write(path, text).map_err(|e| VisionError::io(path, e))?;
        info!("Saved board corners to {}", path.display());
        Ok(())
    }
}

/// Loads the flattened 3x3 camera matrix followed by distortion coefficients.
pub fn load_camera_model(path: &Path) -> Result<CameraModel> {
    let values: Vec<f64> = read_numeric_rows(path)?.into_iter().flatten().collect();
    if values.len() < 9 {
        return Err(VisionError::parse(
            path,
            format!("expected at least 9 values, got {}", values.len()),
        ));
    }

    let matrix = Matrix3::from_row_slice(&values[..9]);
    let distortion = Distortion::from_coeffs(&values[9..]).ok_or_else(|| {
        VisionError::parse(
            path,
            format!(
                "expected 4, 5 or 8 distortion coefficients, got {}",
                values.len() - 9
            ),
        )
    })?;

    let camera = CameraModel::new(matrix, distortion);
    if !camera.is_valid() {
        return Err(VisionError::InvalidCamera {
            reason: format!("camera matrix in {} is not invertible", path.display()),
        });
    }
    Ok(camera)
}

/// Immutable calibration state shared by every pipeline stage.
#[derive(Clone, Debug)]
pub struct CalibrationContext {
    pub camera: CameraModel,
    pub corners: Option<BoardCorners>,
    /// Size every raw frame must have
    pub frame_size: (u32, u32),
}

impl CalibrationContext {
    /// Loads all calibration artifacts. Missing camera data or initialization image is fatal.
    pub fn load(paths: &PathsConfig) -> Result<Self> {
        let camera = load_camera_model(&paths.calibration_data)?;
        let corners = BoardCorners::load(&paths.board_corners)?;
        let frame_size = image::image_dimensions(&paths.initialization_image)
            .map_err(|e| VisionError::image(&paths.initialization_image, e))?;

        info!(
            "Calibration loaded: frame size {}x{}, corners {}",
            frame_size.0,
            frame_size.1,
            if corners.is_some() { "calibrated" } else { "missing" }
        );
        Ok(Self {
            camera,
            corners,
            frame_size,
        })
    }

    /// Same context with freshly calibrated corners.
    pub fn with_corners(self, corners: BoardCorners) -> Self {
        Self {
            corners: Some(corners),
            ..self
        }
    }
}

/// Parses numpy `loadtxt`-style text: whitespace separated, `#` starts a comment.
fn read_numeric_rows(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path).map_err(|e| VisionError::io(path, e))?;
    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    VisionError::parse(path, format!("line {}: bad number '{}'", line_no + 1, tok))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

fn row_shape(rows: &[Vec<f64>]) -> Vec<usize> {
    rows.iter().map(Vec::len).collect()
}

/// Formats like numpy's default `%.18e`, e.g. `1.250000000000000000e+02`.
fn numpy_sci(v: f64) -> String {
    let s = format!("{:.18e}", v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{}e{:+03}", mantissa, exp)
        }
        None => s,
    }
}
