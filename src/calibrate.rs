//! Calibration module.
//! One-time manual setup: the user picks the four board corners on an undistorted frame.
//! Each corner is a coarse pick on the full image followed by a fine pick on a
//! magnified crop around it, giving sub-pixel corners.
//! `CornerCalibrator` is a plain request/response state machine; any UI that can show
//! an image and return a click drives it through `CornerPicker`.
//! `TerminalPicker` writes the image to show into `calibration/` and reads `x,y` from stdin.
//! Future: a windowed picker with real mouse clicks.

use crate::calibration::{BoardCorners, CornerSlot};
use crate::config::CalibratorConfig;
use crate::error::{Result, VisionError};
use dialoguer::Input;
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, info};
use nalgebra::Point2;
use std::fmt;
use std::fs;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickStage {
    /// Click on the full undistorted image
    Coarse,
    /// Click on the magnified crop around the coarse pick
    Fine,
}

impl fmt::Display for PickStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickStage::Coarse => write!(f, "coarse"),
            PickStage::Fine => write!(f, "fine"),
        }
    }
}

/// What the UI has to show next.
#[derive(Clone, Debug)]
pub struct PickRequest {
    pub slot: CornerSlot,
    pub stage: PickStage,
    /// Image to click on
    pub image: RgbImage,
    /// Top-left of `image` in undistorted-image pixels
    pub origin: (u32, u32),
    /// Magnification of `image`; 1 for coarse picks
    pub zoom: u32,
}

pub struct CornerCalibrator {
    image: RgbImage,
    half_size: u32,
    zoom: u32,
    picked: Vec<Point2<f64>>,
    /// Coarse click of the slot currently being refined
    coarse: Option<(u32, u32)>,
}

impl CornerCalibrator {
    /// `image` must already be undistorted; corners are stored in that pixel space.
    pub fn new(image: RgbImage, config: &CalibratorConfig) -> Self {
        Self {
            image,
            half_size: config.zoom_half_size,
            zoom: config.zoom_factor,
            picked: Vec::with_capacity(CornerSlot::ALL.len()),
            coarse: None,
        }
    }

    pub fn current_slot(&self) -> Option<CornerSlot> {
        CornerSlot::ALL.get(self.picked.len()).copied()
    }

    /// Next image to pick on, or `None` once all four corners are in.
    pub fn next_request(&self) -> Option<PickRequest> {
        let slot = self.current_slot()?;
        let request = match self.coarse {
            None => PickRequest {
                slot,
                stage: PickStage::Coarse,
                image: self.image.clone(),
                origin: (0, 0),
                zoom: 1,
            },
            Some(coarse) => {
                let (x0, y0, w, h) = self.crop_window(coarse);
                let crop = imageops::crop_imm(&self.image, x0, y0, w, h).to_image();
                PickRequest {
                    slot,
                    stage: PickStage::Fine,
                    image: imageops::resize(&crop, w * self.zoom, h * self.zoom, FilterType::Nearest),
                    origin: (x0, y0),
                    zoom: self.zoom,
                }
            }
        };
        Some(request)
    }

    /// Feeds the click for the current request. Clicks outside the shown image and
    /// clicks after the fourth corner are errors.
    pub fn submit(&mut self, click: (u32, u32)) -> Result<()> {
        let slot = self.current_slot().ok_or_else(|| VisionError::Calibration {
            reason: "all four corners are already picked".into(),
        })?;

        match self.coarse {
            None => {
                let (w, h) = self.image.dimensions();
                check_inside(click, (w, h))?;
                debug!("{} coarse pick at {:?}", slot, click);
                self.coarse = Some(click);
            }
            Some(coarse) => {
                let (x0, y0, w, h) = self.crop_window(coarse);
                check_inside(click, (w * self.zoom, h * self.zoom))?;
                let point = refine((x0, y0), click, self.zoom);
                info!("{} corner at ({:.2}, {:.2})", slot, point.x, point.y);
                self.picked.push(point);
                self.coarse = None;
            }
        }
        Ok(())
    }

    /// Corners in UL, UR, LL, LR order. Not validated here.
    pub fn finish(self) -> Result<BoardCorners> {
        match self.picked[..] {
            [ul, ur, ll, lr] => Ok(BoardCorners::new([ul, ur, ll, lr])),
            _ => Err(VisionError::Calibration {
                reason: format!("only {} of 4 corners picked", self.picked.len()),
            }),
        }
    }

    /// `(x, y, width, height)` of the fine-pick crop, clamped to the image.
    fn crop_window(&self, (cx, cy): (u32, u32)) -> (u32, u32, u32, u32) {
        let (w, h) = self.image.dimensions();
        let x0 = cx.saturating_sub(self.half_size);
        let y0 = cy.saturating_sub(self.half_size);
        let x1 = cx.saturating_add(self.half_size).min(w);
        let y1 = cy.saturating_add(self.half_size).min(h);
        (x0, y0, x1 - x0, y1 - y0)
    }
}

/// Click on a request image back to undistorted-image pixels.
fn refine(origin: (u32, u32), click: (u32, u32), zoom: u32) -> Point2<f64> {
    Point2::new(
        origin.0 as f64 + click.0 as f64 / zoom as f64,
        origin.1 as f64 + click.1 as f64 / zoom as f64,
    )
}

fn check_inside(click: (u32, u32), (w, h): (u32, u32)) -> Result<()> {
    if click.0 < w && click.1 < h {
        Ok(())
    } else {
        Err(VisionError::Calibration {
            reason: format!("click {:?} outside the {}x{} image", click, w, h),
        })
    }
}

/// Anything that can show a `PickRequest` and return a click on its image.
pub trait CornerPicker {
    fn pick(&mut self, request: &PickRequest) -> Result<(u32, u32)>;
}

/// Saves each request image to `dir` and asks for the click coordinates on stdin.
pub struct TerminalPicker {
    dir: PathBuf,
}

impl TerminalPicker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CornerPicker for TerminalPicker {
    fn pick(&mut self, request: &PickRequest) -> Result<(u32, u32)> {
        fs::create_dir_all(&self.dir).map_err(|e| VisionError::io(&self.dir, e))?;
        let path = self.dir.join(format!("{}_{}.png", request.slot, request.stage));
        request
            .image
            .save(&path)
            .map_err(|e| VisionError::image(&path, e))?;

        let (w, h) = request.image.dimensions();
        println!(
            "{} ({} pick): open {} ({}x{})",
            request.slot.instruction(),
            request.stage,
            path.display(),
            w,
            h
        );

        let answer: String = Input::new()
            .with_prompt("Pixel as x,y")
            .validate_with(move |input: &String| -> std::result::Result<(), String> {
                match parse_click(input) {
                    Some((x, y)) if x < w && y < h => Ok(()),
                    Some(_) => Err(format!("must be inside {}x{}", w, h)),
                    None => Err("expected two integers, e.g. 412,87".into()),
                }
            })
            .interact_text()
            .map_err(|e| VisionError::Calibration {
                reason: format!("reading pick: {}", e),
            })?;

        parse_click(&answer).ok_or_else(|| VisionError::Calibration {
            reason: format!("unreadable pick '{}'", answer),
        })
    }
}

/// Parses `x,y` (spaces allowed).
pub fn parse_click(input: &str) -> Option<(u32, u32)> {
    let (x, y) = input.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Drives the calibrator with `picker` until all four corners are picked.
pub fn run_corner_calibration(
    picker: &mut dyn CornerPicker,
    image: RgbImage,
    config: &CalibratorConfig,
) -> Result<BoardCorners> {
    let mut calibrator = CornerCalibrator::new(image, config);
    while let Some(request) = calibrator.next_request() {
        let click = picker.pick(&request)?;
        calibrator.submit(click)?;
    }
    calibrator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::collections::VecDeque;

    struct ScriptedPicker {
        clicks: VecDeque<(u32, u32)>,
        seen: Vec<(CornerSlot, PickStage, (u32, u32))>,
    }

    impl CornerPicker for ScriptedPicker {
        fn pick(&mut self, request: &PickRequest) -> Result<(u32, u32)> {
            self.seen
                .push((request.slot, request.stage, request.image.dimensions()));
            self.clicks.pop_front().ok_or_else(|| VisionError::Calibration {
                reason: "script ran out".into(),
            })
        }
    }

    fn image() -> RgbImage {
        RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]))
    }

    #[test]
    fn test_fine_pick_refines_coarse_pick() {
        let mut cal = CornerCalibrator::new(image(), &CalibratorConfig::default());
        let first = cal.next_request().unwrap();
        assert_eq!(first.stage, PickStage::Coarse);
        assert_eq!(first.slot, CornerSlot::UpperLeft);

        cal.submit((100, 100)).unwrap();
        let fine = cal.next_request().unwrap();
        assert_eq!(fine.stage, PickStage::Fine);
        assert_eq!(fine.origin, (80, 80));
        assert_eq!(fine.image.dimensions(), (800, 800));
        assert_eq!(refine(fine.origin, (410, 390), fine.zoom), Point2::new(100.5, 99.5));

        cal.submit((410, 390)).unwrap();
        assert_eq!(cal.current_slot(), Some(CornerSlot::UpperRight));
    }

    #[test]
    fn test_four_corners_in_order() {
        let mut picker = ScriptedPicker {
            clicks: VecDeque::from(vec![
                (100, 100),
                (400, 400),
                (540, 100),
                (400, 400),
                (100, 380),
                (400, 400),
                (540, 380),
                (400, 400),
            ]),
            seen: Vec::new(),
        };
        let corners =
            run_corner_calibration(&mut picker, image(), &CalibratorConfig::default()).unwrap();

        assert_eq!(
            corners.points,
            [
                Point2::new(100.0, 100.0),
                Point2::new(540.0, 100.0),
                Point2::new(100.0, 380.0),
                Point2::new(540.0, 380.0),
            ]
        );
        let order: Vec<_> = picker.seen.iter().map(|s| (s.0, s.1)).collect();
        assert_eq!(order[0], (CornerSlot::UpperLeft, PickStage::Coarse));
        assert_eq!(order[1], (CornerSlot::UpperLeft, PickStage::Fine));
        assert_eq!(order[7], (CornerSlot::LowerRight, PickStage::Fine));
        assert_eq!(picker.seen.len(), 8);
    }

    #[test]
    fn test_crop_is_clamped_at_the_image_edge() {
        let mut cal = CornerCalibrator::new(image(), &CalibratorConfig::default());
        cal.submit((5, 470)).unwrap();
        let fine = cal.next_request().unwrap();
        assert_eq!(fine.origin, (0, 450));
        // 25 x 30 source pixels, magnified 20x
        assert_eq!(fine.image.dimensions(), (500, 600));

        assert!(cal.submit((500, 0)).is_err());
        cal.submit((100, 400)).unwrap();
        assert_eq!(cal.current_slot(), Some(CornerSlot::UpperRight));
    }

    #[test]
    fn test_submit_after_completion_is_an_error() {
        let mut cal = CornerCalibrator::new(image(), &CalibratorConfig::default());
        for _ in 0..4 {
            cal.submit((320, 240)).unwrap();
            cal.submit((400, 400)).unwrap();
        }
        assert_eq!(cal.current_slot(), None);
        assert!(cal.next_request().is_none());
        assert!(matches!(
            cal.submit((1, 1)),
            Err(VisionError::Calibration { .. })
        ));
        assert!(cal.finish().is_ok());
    }

    #[test]
    fn test_finish_before_completion_is_an_error() {
        let mut cal = CornerCalibrator::new(image(), &CalibratorConfig::default());
        cal.submit((10, 10)).unwrap();
        assert!(cal.finish().is_err());
    }

    #[test]
    fn test_coarse_click_outside_image_is_rejected() {
        let mut cal = CornerCalibrator::new(image(), &CalibratorConfig::default());
        assert!(cal.submit((640, 10)).is_err());
        assert_eq!(cal.next_request().unwrap().stage, PickStage::Coarse);
    }

    #[test]
    fn test_parse_click() {
        assert_eq!(parse_click("412,87"), Some((412, 87)));
        assert_eq!(parse_click(" 3 , 4 "), Some((3, 4)));
        assert_eq!(parse_click("3;4"), None);
        assert_eq!(parse_click("-3,4"), None);
    }
}
