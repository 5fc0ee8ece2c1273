//! Config module.
//! Manages I/O for checkers_config.json (file paths, board geometry, thresholds).
//! Uses serde for JSON serialization.
//! Every section has defaults tuned for the original physical setup, so a missing
//! file or a partial file is fine.
//! Future: per-camera profiles if more than one rig is in use.

use crate::error::{Result, VisionError};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "checkers_config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub capture: CaptureConfig,
    pub board: BoardConfig,
    pub segmentation: SegmentationConfig,
    pub locator: LocatorConfig,
    pub calibrator: CalibratorConfig,
}

/// Calibration inputs and the published output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Flattened 3x3 camera matrix followed by distortion coefficients
    pub calibration_data: PathBuf,
    /// Four board corners, one `x y` row each
    pub board_corners: PathBuf,
    /// Reference image that fixes the expected frame size
    pub initialization_image: PathBuf,
    /// Published piece coordinates
    pub pieces_file: PathBuf,
    /// Where demo mode writes its debug views
    pub debug_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            calibration_data: PathBuf::from("calibration_data.txt"),
            board_corners: PathBuf::from("board_corners.txt"),
            initialization_image: PathBuf::from("initialization.jpg"),
            pieces_file: PathBuf::from("pieces.txt"),
            debug_dir: PathBuf::from("debug"),
        }
    }
}

/// Frame source locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Spool image the external capture process keeps overwriting (live/record)
    pub live_frame: PathBuf,
    /// Directory of recorded frames, replayed in video mode and filled in record mode
    pub video_dir: PathBuf,
    /// Minimum delay between two live frames
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            live_frame: PathBuf::from("live_frame.png"),
            video_dir: PathBuf::from("video"),
            poll_interval_ms: 100,
        }
    }
}

/// Physical board geometry and the working resolution of the normalized frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Board side length in mm; must be right for coordinates to be right
    pub board_size_mm: f64,
    /// Working resolution of the normalized frame
    pub px_per_mm: f64,
    /// Margin around the board where pieces can still be found
    pub border_px: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            board_size_mm: 244.0,
            px_per_mm: 2.0,
            border_px: 20,
        }
    }
}

impl BoardConfig {
    /// Board side length in normalized-frame pixels.
    pub fn board_px(&self) -> u32 {
        (self.board_size_mm * self.px_per_mm).round() as u32
    }

    /// Side length of the square normalized frame, border included.
    pub fn frame_side(&self) -> u32 {
        self.board_px() + 2 * self.border_px
    }
}

/// Inclusive HSV box in OpenCV 8-bit ranges (H 0-179, S and V 0-255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}

/// Fixed thresholds tuned for one physical setup. Not adaptive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Gaussian sigma; 1.1 matches a 5x5 kernel with automatic sigma
    pub blur_sigma: f32,
    /// Gray values at or below this are black candidates
    pub black_threshold: u8,
    /// Gray values at or above this are white candidates
    pub white_threshold: u8,
    /// Blues that read as black
    pub blue_hsv: HsvRange,
    /// Yellows that read as white
    pub yellow_hsv: HsvRange,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            black_threshold: 60,
            white_threshold: 230,
            blue_hsv: HsvRange {
                lower: [30, 50, 50],
                upper: [180, 255, 255],
            },
            yellow_hsv: HsvRange {
                lower: [5, 50, 0],
                upper: [70, 255, 255],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Smallest accepted enclosing-circle radius in pixels (inclusive)
    pub min_radius: f32,
    /// Largest accepted enclosing-circle radius in pixels (inclusive)
    pub max_radius: f32,
    /// Added to every published (x, z) pair, for consumers with a shifted origin
    pub origin_offset_mm: [f64; 2],
    /// +1 or -1 per published axis (x, z), applied before the offset
    pub axis_sign: [f64; 2],
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_radius: 25.0,
            max_radius: 50.0,
            origin_offset_mm: [0.0, 0.0],
            axis_sign: [1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Half side of the crop shown for the fine click
    pub zoom_half_size: u32,
    /// Magnification of the fine-click crop
    pub zoom_factor: u32,
    /// Where the terminal picker writes the images to click on
    pub prompt_dir: PathBuf,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            zoom_half_size: 20,
            zoom_factor: 20,
            prompt_dir: PathBuf::from("calibration"),
        }
    }
}

impl PipelineConfig {
    /// Loads config from `path`, or from `checkers_config.json` if present, else defaults.
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_json_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_json_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| VisionError::io(path, e))?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| VisionError::parse(path, e.to_string()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_json_file(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| VisionError::parse(path, e.to_string()))?;
        fs::write(path, text).map_err(|e| VisionError::io(path, e))
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let board = &self.board;
        if !(board.board_size_mm > 0.0) {
            return Err(VisionError::invalid_config(
                "board.board_size_mm",
                board.board_size_mm,
            ));
        }
        if !(board.px_per_mm > 0.0) {
            return Err(VisionError::invalid_config("board.px_per_mm", board.px_per_mm));
        }

        let seg = &self.segmentation;
        // Disjoint masks rely on this ordering
        if seg.black_threshold >= seg.white_threshold {
            return Err(VisionError::invalid_config(
                "segmentation.black_threshold",
                format!("{} >= white_threshold {}", seg.black_threshold, seg.white_threshold),
            ));
        }
        if !(seg.blur_sigma > 0.0) {
            return Err(VisionError::invalid_config(
                "segmentation.blur_sigma",
                seg.blur_sigma,
            ));
        }

        let loc = &self.locator;
        if !(loc.min_radius >= 0.0 && loc.min_radius <= loc.max_radius) {
            return Err(VisionError::invalid_config(
                "locator.min_radius",
                format!("{} (max_radius {})", loc.min_radius, loc.max_radius),
            ));
        }

        if loc.axis_sign.iter().any(|s| s.abs() != 1.0) {
            return Err(VisionError::invalid_config(
                "locator.axis_sign",
                format!("{:?}", loc.axis_sign),
            ));
        }

        let cal = &self.calibrator;
        if cal.zoom_half_size == 0 || cal.zoom_factor == 0 {
            return Err(VisionError::invalid_config(
                "calibrator.zoom",
                format!("half_size {} factor {}", cal.zoom_half_size, cal.zoom_factor),
            ));
        }
        Ok(())
    }
}
