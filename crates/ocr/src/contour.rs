//! Receipt outline detection: blur, inverse adaptive threshold, then the
//! largest external contour found by `imageproc`'s border following.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::adaptive_threshold;
use imageproc::filter::gaussian_blur_f32;

/// σ of the default 5×5 Gaussian window.
const GAUSSIAN_SIGMA: f32 = 1.1;
/// 11×11 neighbourhood for the local mean.
const THRESHOLD_RADIUS: u32 = 5;

/// Axis-aligned bounds, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Bounds {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Grows by `margin` on every side without leaving a `width`×`height` image.
    pub fn expand(&self, margin: u32, width: u32, height: u32) -> Bounds {
        Bounds {
            min_x: self.min_x.saturating_sub(margin),
            min_y: self.min_y.saturating_sub(margin),
            max_x: self.max_x.saturating_add(margin).min(width.saturating_sub(1)),
            max_y: self.max_y.saturating_add(margin).min(height.saturating_sub(1)),
        }
    }
}

/// An external contour reduced to its bounding box and polygon area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outline {
    pub bounds: Bounds,
    pub area: f64,
}

impl Outline {
    fn from_contour(contour: &Contour<u32>) -> Option<Self> {
        let first = contour.points.first()?;
        let mut bounds = Bounds { min_x: first.x, min_y: first.y, max_x: first.x, max_y: first.y };
        for p in &contour.points {
            bounds.min_x = bounds.min_x.min(p.x);
            bounds.min_y = bounds.min_y.min(p.y);
            bounds.max_x = bounds.max_x.max(p.x);
            bounds.max_y = bounds.max_y.max(p.y);
        }
        Some(Self { bounds, area: polygon_area(contour) })
    }
}

/// Shoelace area of the traced border.
fn polygon_area(contour: &Contour<u32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Non-zero where a pixel is darker than the mean of its neighbourhood.
pub fn edge_mask(gray: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, GAUSSIAN_SIGMA);
    let mut mask = adaptive_threshold(&blurred, THRESHOLD_RADIUS);
    image::imageops::invert(&mut mask);
    mask
}

pub fn largest_outline(mask: &GrayImage) -> Option<Outline> {
    find_contours::<u32>(mask)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter_map(Outline::from_contour)
        .max_by(|a, b| a.area.total_cmp(&b.area))
}
