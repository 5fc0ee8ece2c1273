//! Object locator.
//! Finds piece-sized blobs in one binary mask and converts their centroids to board
//! millimetres. Stateless: nothing is tracked between frames.
//!
//! Per contour:
//! 1. external contours only (holes and anything nested inside them are ignored)
//! 2. minimum enclosing circle, kept iff `min_radius <= r <= max_radius`
//! 3. polygon moments for the centroid; zero-area contours are skipped
//!
//! Survivors are ranked by how disc-like they are (contour area over enclosing-circle
//! area), ties broken by image row then column, and the best 12 fill the `PieceSet`.

use crate::config::{BoardConfig, LocatorConfig};
use crate::pieces::{PieceColor, PieceSet, PIECES_PER_COLOR};
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use log::trace;
use std::cmp::Ordering;

/// Slack on the radius bounds so float noise cannot flip an exact boundary value
const RADIUS_EPS: f64 = 1e-6;
/// Radius of the dot drawn on each centroid
const CENTER_DOT_RADIUS: i32 = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub center: (f64, f64),
    pub radius: f64,
}

impl Circle {
    fn contains(&self, p: (f64, f64)) -> bool {
        distance(self.center, p) <= self.radius + 1e-9
    }
}

/// One accepted blob, in normalized-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub centroid: (f64, f64),
    pub circle: Circle,
    pub area: f64,
    /// Contour area over enclosing-circle area, 1.0 for a perfect disc
    pub confidence: f64,
}

pub struct ObjectLocator {
    config: LocatorConfig,
    board: BoardConfig,
}

impl ObjectLocator {
    pub fn new(config: LocatorConfig, board: BoardConfig) -> Self {
        Self { config, board }
    }

    /// Accepted blobs, best first.
    pub fn detect(&self, mask: &GrayImage) -> Vec<Detection> {
        let contours = find_contours::<i32>(mask);
        let mut detections = Vec::new();

        for contour in contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        {
            let Some(circle) = min_enclosing_circle(&contour.points) else {
                continue;
            };
            if circle.radius < self.config.min_radius as f64 - RADIUS_EPS
                || circle.radius > self.config.max_radius as f64 + RADIUS_EPS
            {
                continue;
            }

            let Some((area, centroid)) = polygon_centroid(&contour.points) else {
                trace!("Skipping zero-area contour at {:?}", circle.center);
                continue;
            };
            let circle_area = std::f64::consts::PI * circle.radius * circle.radius;
            detections.push(Detection {
                centroid,
                circle,
                area,
                confidence: (area / circle_area).clamp(0.0, 1.0),
            });
        }

        detections.sort_by(rank);
        detections
    }

    /// Annotated copy of `frame` plus the 12-slot piece set for this mask.
    pub fn locate(&self, mask: &GrayImage, frame: &RgbImage, color: PieceColor) -> (RgbImage, PieceSet) {
        let detections = self.detect(mask);
        let mut annotated = frame.clone();
        let draw = color.draw_color();

        for det in &detections {
            let center = (det.circle.center.0 as i32, det.circle.center.1 as i32);
            let radius = det.circle.radius as i32;
            // 2 px outline
            draw_hollow_circle_mut(&mut annotated, center, radius, draw);
            draw_hollow_circle_mut(&mut annotated, center, radius - 1, draw);
            let dot = (det.centroid.0.round() as i32, det.centroid.1.round() as i32);
            draw_filled_circle_mut(&mut annotated, dot, CENTER_DOT_RADIUS, draw);
        }

        if detections.len() > PIECES_PER_COLOR {
            trace!(
                "{} {} candidates, keeping the best {}",
                detections.len(),
                color,
                PIECES_PER_COLOR
            );
        }
        let pieces = PieceSet::from_found(detections.iter().map(|d| self.to_board_mm(d.centroid)));
        (annotated, pieces)
    }

    /// Normalized-frame pixel to board millimetres, origin at the board's bottom-left corner.
    pub fn to_board_mm(&self, px: (f64, f64)) -> (f64, f64) {
        let border = self.board.border_px as f64;
        let bottom = border + self.board.board_px() as f64;
        let [off_x, off_z] = self.config.origin_offset_mm;
        let [sign_x, sign_z] = self.config.axis_sign;
        (
            sign_x * (px.0 - border) / self.board.px_per_mm + off_x,
            // image y grows downward, board z grows upward
            sign_z * (bottom - px.1) / self.board.px_per_mm + off_z,
        )
    }
}

fn rank(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.centroid.1.total_cmp(&b.centroid.1))
        .then(a.centroid.0.total_cmp(&b.centroid.0))
}

/// Smallest circle containing every point (Welzl, run on the convex hull).
pub fn min_enclosing_circle(points: &[Point<i32>]) -> Option<Circle> {
    let hull = convex_hull(points);
    let pts: Vec<(f64, f64)> = hull.iter().map(|p| (p.x as f64, p.y as f64)).collect();
    let first = *pts.first()?;

    let mut circle = Circle {
        center: first,
        radius: 0.0,
    };
    for i in 1..pts.len() {
        if circle.contains(pts[i]) {
            continue;
        }
        circle = Circle {
            center: pts[i],
            radius: 0.0,
        };
        for j in 0..i {
            if circle.contains(pts[j]) {
                continue;
            }
            circle = circle_from_two(pts[i], pts[j]);
            for k in 0..j {
                if !circle.contains(pts[k]) {
                    circle = circle_from_three(pts[i], pts[j], pts[k]);
                }
            }
        }
    }
    Some(circle)
}

fn circle_from_two(a: (f64, f64), b: (f64, f64)) -> Circle {
    Circle {
        center: ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0),
        radius: distance(a, b) / 2.0,
    }
}

fn circle_from_three(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> Circle {
    let d = 2.0 * (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1));
    if d.abs() < 1e-12 {
        // Collinear: the widest pair spans all three
        return [circle_from_two(a, b), circle_from_two(a, c), circle_from_two(b, c)]
            .into_iter()
            .max_by(|p, q| p.radius.total_cmp(&q.radius))
            .unwrap_or(circle_from_two(a, b));
    }
    let sq = |p: (f64, f64)| p.0 * p.0 + p.1 * p.1;
    let ux = (sq(a) * (b.1 - c.1) + sq(b) * (c.1 - a.1) + sq(c) * (a.1 - b.1)) / d;
    let uy = (sq(a) * (c.0 - b.0) + sq(b) * (a.0 - c.0) + sq(c) * (b.0 - a.0)) / d;
    let center = (ux, uy);
    Circle {
        center,
        radius: distance(center, a),
    }
}

/// Area and centroid of the closed polygon through `points` (Green's theorem).
/// `None` when the enclosed area is zero.
pub fn polygon_centroid(points: &[Point<i32>]) -> Option<(f64, (f64, f64))> {
    let n = points.len();
    let (mut m00, mut m10, mut m01) = (0.0_f64, 0.0_f64, 0.0_f64);
    for i in 0..n {
        let p = points[i];
        let q = points[(i + 1) % n];
        let (x0, y0, x1, y1) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
        let cross = x0 * y1 - x1 * y0;
        m00 += cross;
        m10 += cross * (x0 + x1);
        m01 += cross * (y0 + y1);
    }
    if m00.abs() < f64::EPSILON {
        return None;
    }
    let area = m00 / 2.0;
    Some((area.abs(), (m10 / (6.0 * area), m01 / (6.0 * area))))
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::PieceSlot;
    use approx::assert_relative_eq;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn locator() -> ObjectLocator {
        ObjectLocator::new(LocatorConfig::default(), BoardConfig::default())
    }

    fn mask_with_discs(size: u32, discs: &[((i32, i32), i32)]) -> GrayImage {
        let mut mask = GrayImage::new(size, size);
        for &(center, radius) in discs {
            draw_filled_circle_mut(&mut mask, center, radius, Luma([255]));
        }
        mask
    }

    #[test]
    fn test_min_enclosing_circle_of_square() {
        let pts = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
            Point::new(5, 5),
        ];
        let c = min_enclosing_circle(&pts).unwrap();
        assert_relative_eq!(c.center.0, 5.0, epsilon = 1e-9);
        assert_relative_eq!(c.center.1, 5.0, epsilon = 1e-9);
        assert_relative_eq!(c.radius, 50f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_min_enclosing_circle_of_triangle() {
        // Obtuse triangle: the circle is set by the longest side alone
        let pts = [Point::new(0, 0), Point::new(10, 0), Point::new(5, 1)];
        let c = min_enclosing_circle(&pts).unwrap();
        assert_relative_eq!(c.radius, 5.0, epsilon = 1e-9);
        assert!(min_enclosing_circle(&[]).is_none());
    }

    #[test]
    fn test_polygon_centroid() {
        let square = [
            Point::new(2, 2),
            Point::new(6, 2),
            Point::new(6, 6),
            Point::new(2, 6),
        ];
        let (area, (cx, cy)) = polygon_centroid(&square).unwrap();
        assert_relative_eq!(area, 16.0);
        assert_relative_eq!(cx, 4.0);
        assert_relative_eq!(cy, 4.0);

        // Reverse orientation gives the same answer
        let reversed: Vec<_> = square.iter().rev().copied().collect();
        let (area, (cx, _)) = polygon_centroid(&reversed).unwrap();
        assert_relative_eq!(area, 16.0);
        assert_relative_eq!(cx, 4.0);
    }

    #[test]
    fn test_zero_area_contour_is_skipped() {
        let line = [Point::new(0, 0), Point::new(5, 0), Point::new(10, 0)];
        assert!(polygon_centroid(&line).is_none());
    }

    #[test]
    fn test_radius_bounds_are_inclusive() {
        // Rectangles with 3-4-5 diagonals have exact enclosing radii
        let loc = locator();
        for ((w, h), expected) in [
            ((31, 40), 0), // r ~ 24.6
            ((31, 41), 1), // r = 25
            ((61, 81), 1), // r = 50
            ((61, 82), 0), // r ~ 50.4
        ] {
            let mut mask = GrayImage::new(160, 160);
            draw_filled_rect_mut(&mut mask, Rect::at(20, 20).of_size(w, h), Luma([255]));
            assert_eq!(loc.detect(&mask).len(), expected, "{}x{} rectangle", w, h);
        }
    }

    #[test]
    fn test_specks_and_merged_blobs_are_rejected() {
        let mut mask = mask_with_discs(400, &[((50, 50), 3), ((200, 200), 30)]);
        draw_filled_rect_mut(&mut mask, Rect::at(250, 20).of_size(140, 140), Luma([255]));
        let found = locator().detect(&mask);
        assert_eq!(found.len(), 1);
        assert_relative_eq!(found[0].centroid.0, 200.0, epsilon = 0.5);
        assert_relative_eq!(found[0].centroid.1, 200.0, epsilon = 0.5);
    }

    #[test]
    fn test_holes_are_ignored() {
        // A ring: one outer border, one hole; only the outer border counts
        let mut mask = mask_with_discs(200, &[((100, 100), 40)]);
        draw_filled_circle_mut(&mut mask, (100, 100), 30, Luma([0]));
        let found = locator().detect(&mask);
        assert_eq!(found.len(), 1);
        assert_relative_eq!(found[0].circle.radius, 40.0, epsilon = 1.0);
    }

    #[test]
    fn test_always_twelve_slots() {
        let loc = locator();
        let frame = RgbImage::new(400, 400);

        let (_, none) = loc.locate(&GrayImage::new(400, 400), &frame, PieceColor::Black);
        assert_eq!(none.slots().len(), PIECES_PER_COLOR);
        assert!(none.slots().iter().all(|s| *s == PieceSlot::Empty));

        let discs: Vec<_> = (0..16)
            .map(|i| ((50 + (i % 4) * 90, 50 + (i / 4) * 90), 30))
            .collect();
        let mask = mask_with_discs(400, &discs);
        assert_eq!(loc.detect(&mask).len(), 16);
        let (_, many) = loc.locate(&mask, &frame, PieceColor::Black);
        assert_eq!(many.slots().len(), PIECES_PER_COLOR);
        assert_eq!(many.found_count(), PIECES_PER_COLOR);
    }

    #[test]
    fn test_least_disc_like_blobs_are_dropped_first() {
        let mut mask = mask_with_discs(
            500,
            &(0..12)
                .map(|i| ((50 + (i % 4) * 90, 50 + (i / 4) * 90), 30))
                .collect::<Vec<_>>(),
        );
        // Two squares with a 35 px enclosing radius, inside the size window
        draw_filled_rect_mut(&mut mask, Rect::at(40, 380).of_size(50, 50), Luma([255]));
        draw_filled_rect_mut(&mut mask, Rect::at(300, 380).of_size(50, 50), Luma([255]));

        let loc = locator();
        let detections = loc.detect(&mask);
        assert_eq!(detections.len(), 14);
        assert!(detections[..12].iter().all(|d| d.centroid.1 < 300.0));
        assert!(detections[12..].iter().all(|d| d.centroid.1 > 380.0));
    }

    #[test]
    fn test_board_coordinates() {
        let loc = locator();
        // Bottom-left board corner of the default 528 px frame
        let (x, z) = loc.to_board_mm((20.0, 508.0));
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(z, 0.0);
        let (x, z) = loc.to_board_mm((150.0, 150.0));
        assert_relative_eq!(x, 65.0);
        assert_relative_eq!(z, 179.0);

        let mut config = LocatorConfig::default();
        config.origin_offset_mm = [23.0, -23.0];
        let shifted = ObjectLocator::new(config, BoardConfig::default());
        let (x, z) = shifted.to_board_mm((150.0, 150.0));
        assert_relative_eq!(x, 88.0);
        assert_relative_eq!(z, 156.0);
    }

    #[test]
    fn test_negated_z_convention() {
        // Legacy consumers: x shifted by 23 mm, z negated and shifted by -23 mm
        let mut config = LocatorConfig::default();
        config.origin_offset_mm = [23.0, -23.0];
        config.axis_sign = [1.0, -1.0];
        let legacy = ObjectLocator::new(config, BoardConfig::default());
        let (x, z) = legacy.to_board_mm((150.0, 150.0));
        assert_relative_eq!(x, 23.0 + (150.0 - 20.0) / 2.0);
        assert_relative_eq!(z, -23.0 - (488.0 - 150.0 + 20.0) / 2.0);
    }

    #[test]
    fn test_single_black_piece_on_normalized_frame() {
        use crate::config::SegmentationConfig;
        use crate::segment::ColorSegmenter;
        use image::Rgb;

        let mut frame = RgbImage::from_pixel(528, 528, Rgb([128, 128, 128]));
        draw_filled_circle_mut(&mut frame, (150, 150), 30, Rgb([20, 20, 20]));
        let masks = ColorSegmenter::new(SegmentationConfig::default()).segment(&frame);

        let loc = locator();
        let (annotated, black) = loc.locate(&masks.black, &frame, PieceColor::Black);
        let (_, white) = loc.locate(&masks.white, &annotated, PieceColor::White);

        assert_eq!(black.found_count(), 1);
        let (x, z) = black.found().next().unwrap();
        assert_relative_eq!(x, 65.0, epsilon = 1.0);
        assert_relative_eq!(z, 179.0, epsilon = 1.0);
        assert_eq!(
            black.slots().iter().filter(|s| **s == PieceSlot::Empty).count(),
            PIECES_PER_COLOR - 1
        );
        assert_eq!(white, PieceSet::empty());
    }

    #[test]
    fn test_annotation_marks_centroid() {
        let mask = mask_with_discs(200, &[((100, 100), 30)]);
        let frame = RgbImage::new(200, 200);
        let (annotated, pieces) = locator().locate(&mask, &frame, PieceColor::White);
        assert_eq!(pieces.found_count(), 1);
        assert_eq!(*annotated.get_pixel(100, 100), PieceColor::White.draw_color());
        assert_eq!(*frame.get_pixel(100, 100), image::Rgb([0, 0, 0]));
    }
}
