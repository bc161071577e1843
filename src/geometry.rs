//! Screen-space geometry for surfaces
//!
//! Corners are stored as absolute pixels in the viewport's logical
//! coordinate system (origin top-left, y grows downward). They are only
//! converted to normalized device coordinates at draw time, so resizing the
//! viewport never rewrites stored corners.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A 2D point in screen pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The four corners of a surface.
///
/// Order: top-left, top-right, bottom-right, bottom-left by convention. The
/// order is never re-sorted because each slot is bound to a fixed UV.
pub type Quad = [Point; 4];

/// Display labels for the four corner slots
pub const CORNER_LABELS: [&str; 4] = ["Top Left", "Top Right", "Bottom Right", "Bottom Left"];

/// The render target: logical size plus device pixel ratio
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64, device_pixel_ratio: f64) -> Self {
        Self {
            width,
            height,
            device_pixel_ratio,
        }
    }

    /// Framebuffer size in device pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let dpr = if self.device_pixel_ratio > 0.0 {
            self.device_pixel_ratio
        } else {
            1.0
        };
        (
            (self.width * dpr).floor().max(1.0) as u32,
            (self.height * dpr).floor().max(1.0) as u32,
        )
    }

    /// Map a pixel-space point to normalized device coordinates.
    ///
    /// Y is flipped: pixel space grows downward, device space grows upward.
    pub fn to_ndc(&self, p: Point) -> (f64, f64) {
        let x = (p.x / self.width) * 2.0 - 1.0;
        let y = -((p.y / self.height) * 2.0 - 1.0);
        (x, y)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 720.0, 1.0)
    }
}

/// An axis-aligned rectangle in pixel space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }
}

/// Default quad for a new surface: 10% to 90% of the viewport on both axes
pub fn default_quad(viewport: &Viewport) -> Quad {
    let w = viewport.width;
    let h = viewport.height;
    [
        Point::new(w * 0.1, h * 0.1),
        Point::new(w * 0.9, h * 0.1),
        Point::new(w * 0.9, h * 0.9),
        Point::new(w * 0.1, h * 0.9),
    ]
}

/// Translate every corner of a quad
pub fn translate_quad(quad: &mut Quad, dx: f64, dy: f64) {
    for corner in quad.iter_mut() {
        *corner = corner.offset(dx, dy);
    }
}

pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees / 180.0 * PI
}

/// Convert a rotation back to degrees for display, normalized into [0, 360)
pub fn radians_to_display_degrees(radians: f64) -> f64 {
    let degrees = (radians * 180.0 / PI) % 360.0;
    if degrees < 0.0 {
        degrees + 360.0
    } else {
        degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndc_corners() {
        let vp = Viewport::new(1000.0, 800.0, 1.0);
        assert_eq!(vp.to_ndc(Point::new(0.0, 0.0)), (-1.0, 1.0));
        assert_eq!(vp.to_ndc(Point::new(1000.0, 800.0)), (1.0, -1.0));
        assert_eq!(vp.to_ndc(Point::new(500.0, 400.0)), (0.0, 0.0));
    }

    #[test]
    fn test_ndc_off_screen() {
        let vp = Viewport::new(100.0, 100.0, 1.0);
        let (x, y) = vp.to_ndc(Point::new(-50.0, 150.0));
        assert_eq!(x, -2.0);
        assert_eq!(y, -2.0);
    }

    #[test]
    fn test_default_quad() {
        let vp = Viewport::new(960.0, 540.0, 1.0);
        let quad = default_quad(&vp);
        assert_eq!(quad[0], Point::new(96.0, 54.0));
        assert_eq!(quad[2], Point::new(864.0, 486.0));
    }

    #[test]
    fn test_framebuffer_size_uses_dpr() {
        let vp = Viewport::new(640.0, 360.0, 1.5);
        assert_eq!(vp.framebuffer_size(), (960, 540));
    }

    #[test]
    fn test_rotation_conversion() {
        assert_eq!(degrees_to_radians(180.0), PI);
        assert!((radians_to_display_degrees(-PI / 2.0) - 270.0).abs() < 1e-9);
        assert!((radians_to_display_degrees(degrees_to_radians(450.0)) - 90.0).abs() < 1e-9);
    }
}
