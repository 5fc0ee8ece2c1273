//! Error types for the detection pipeline.
//! Library-level modules return `VisionError`; `main` wraps them with anyhow context.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the pipeline modules
pub type Result<T> = std::result::Result<T, VisionError>;

#[derive(Error, Debug)]
pub enum VisionError {
    /// Filesystem access failed for a known path
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A calibration or coordinate file had unexpected content
    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    /// Image could not be decoded or encoded
    #[error("Image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Frame dimensions differ from the ones the undistorter was built for
    #[error("Frame size {actual:?} does not match calibrated size {expected:?}")]
    FrameSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Board corners were never calibrated
    #[error("Board corners are not calibrated; run the corner calibration first")]
    MissingCorners,

    /// Corners do not describe a usable quadrilateral
    #[error("Degenerate board corners: {reason}")]
    DegenerateCorners { reason: String },

    /// Camera model cannot be used for undistortion
    #[error("Invalid camera model: {reason}")]
    InvalidCamera { reason: String },

    /// Configuration value out of range
    #[error("Invalid config: {field} = {value}")]
    InvalidConfig { field: String, value: String },

    /// Corner calibrator was driven out of order
    #[error("Calibration error: {reason}")]
    Calibration { reason: String },
}

impl VisionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateCorners {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(field: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = VisionError::FrameSizeMismatch {
            expected: (1920, 1080),
            actual: (640, 480),
        };
        assert_eq!(
            err.to_string(),
            "Frame size (640, 480) does not match calibrated size (1920, 1080)"
        );

        let err = VisionError::parse("board_corners.txt", "expected 4 rows, got 3");
        assert!(err.to_string().contains("board_corners.txt"));
        assert!(err.to_string().contains("expected 4 rows"));
    }
}
