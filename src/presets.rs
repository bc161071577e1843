//! Corner presets
//!
//! Quad presets reshape the active surface. Shape presets add a group of new
//! surfaces whose corners fake a 3D solid with 2D offsets; some faces repeat
//! a corner so the quad collapses into a triangle. Everything here is a pure
//! function of the viewport size (and the reserved area for the presets that
//! avoid the control panel).

use crate::geometry::{Point, Quad, Rect};

/// Names accepted by [`quad_preset`]
pub const QUAD_PRESETS: &[&str] = &[
    "fullscreen",
    "center",
    "top-half",
    "bottom-half",
    "left-half",
    "right-half",
    "trapezoid",
];

/// Names accepted by [`shape_preset`]
pub const SHAPE_PRESETS: &[&str] = &["cube", "prism", "pyramid", "cylinder", "house"];

fn p(x: f64, y: f64) -> Point {
    Point::new(x, y)
}

/// Left edge and bottom edge that keep clear of the reserved area
fn safe_bounds(h: f64, reserved: Option<&Rect>) -> (Option<f64>, Option<f64>) {
    let min_x = reserved.map(|r| r.right).filter(|&x| x > 0.0);
    let max_y = reserved.map(|r| r.top).filter(|&y| y > 0.0 && y < h);
    (min_x, max_y)
}

/// Corners for a named quad preset, or `None` if the name is unknown
pub fn quad_preset(name: &str, w: f64, h: f64, reserved: Option<&Rect>) -> Option<Quad> {
    let (min_x, max_y) = safe_bounds(h, reserved);

    let quad = match name {
        "fullscreen" => {
            let min_x = min_x.unwrap_or(0.0);
            let max_y = max_y.unwrap_or(h);
            [p(0.0, 0.0), p(w, 0.0), p(w, max_y), p(min_x, max_y)]
        }
        "center" => {
            let size = w.min(h) * 0.6;
            let cx = w / 2.0;
            let cy = h / 2.0;
            [
                p(cx - size / 2.0, cy - size / 2.0),
                p(cx + size / 2.0, cy - size / 2.0),
                p(cx + size / 2.0, cy + size / 2.0),
                p(cx - size / 2.0, cy + size / 2.0),
            ]
        }
        "top-half" => [p(0.0, 0.0), p(w, 0.0), p(w, h / 2.0), p(0.0, h / 2.0)],
        "bottom-half" => {
            let min_x = min_x.unwrap_or(0.0);
            let max_y = max_y.unwrap_or(h);
            [p(0.0, h / 2.0), p(w, h / 2.0), p(w, max_y), p(min_x, max_y)]
        }
        "left-half" => {
            let min_x = min_x.unwrap_or(0.0);
            let max_y = max_y.unwrap_or(h);
            [p(min_x, 0.0), p(w / 2.0, 0.0), p(w / 2.0, max_y), p(min_x, max_y)]
        }
        "right-half" => [p(w / 2.0, 0.0), p(w, 0.0), p(w, h), p(w / 2.0, h)],
        "trapezoid" => {
            let min_x = min_x.unwrap_or(w * 0.1);
            let max_y = max_y.unwrap_or(h);
            [p(w * 0.2, 0.0), p(w * 0.8, 0.0), p(w * 0.9, max_y), p(min_x, max_y)]
        }
        _ => return None,
    };
    Some(quad)
}

/// Named faces for a shape preset, in creation order
pub fn shape_preset(name: &str, w: f64, h: f64) -> Option<Vec<(String, Quad)>> {
    let faces = match name {
        "cube" => cube(w, h),
        "prism" => prism(w, h),
        "pyramid" => pyramid(w, h),
        "cylinder" => cylinder(w, h),
        "house" => house(w, h),
        _ => return None,
    };
    Some(
        faces
            .into_iter()
            .map(|(label, quad)| (label.to_string(), quad))
            .collect(),
    )
}

fn cube(w: f64, h: f64) -> Vec<(&'static str, Quad)> {
    let size = w.min(h) * 0.3;
    let (cx, cy) = (w * 0.5, h * 0.5);
    let half = size / 2.0;
    let offset = size * 0.3;

    vec![
        (
            "Cube - Front",
            [
                p(cx - half, cy - half),
                p(cx + half, cy - half),
                p(cx + half, cy + half),
                p(cx - half, cy + half),
            ],
        ),
        (
            "Cube - Top",
            [
                p(cx - half, cy - half),
                p(cx + half, cy - half),
                p(cx + half + offset, cy - half - offset),
                p(cx - half + offset, cy - half - offset),
            ],
        ),
        (
            "Cube - Right",
            [
                p(cx + half, cy - half),
                p(cx + half + offset, cy - half - offset),
                p(cx + half + offset, cy + half - offset),
                p(cx + half, cy + half),
            ],
        ),
    ]
}

fn prism(w: f64, h: f64) -> Vec<(&'static str, Quad)> {
    let size = w.min(h) * 0.3;
    let (cx, cy) = (w * 0.5, h * 0.5);
    let half = size / 2.0;
    let offset = size * 0.3;

    vec![
        (
            "Prism - Front",
            [
                p(cx, cy - half),
                p(cx + half, cy + half),
                p(cx - half, cy + half),
                // repeated: the quad collapses to a triangle
                p(cx - half, cy + half),
            ],
        ),
        (
            "Prism - Top",
            [
                p(cx, cy - half),
                p(cx + half, cy + half),
                p(cx + half + offset, cy + half - offset),
                p(cx + offset, cy - half - offset),
            ],
        ),
        (
            "Prism - Right",
            [
                p(cx + half, cy + half),
                p(cx + half + offset, cy + half - offset),
                p(cx + half + offset, cy + half - offset),
                p(cx + half, cy + half),
            ],
        ),
    ]
}

fn pyramid(w: f64, h: f64) -> Vec<(&'static str, Quad)> {
    let size = w.min(h) * 0.35;
    let (cx, cy) = (w * 0.5, h * 0.5);
    let half = size / 2.0;
    let apex = p(cx, cy - half);
    let bottom_left = p(cx - half, cy + half);
    let bottom_right = p(cx + half, cy + half);

    vec![
        (
            "Pyramid - Base",
            [bottom_left, bottom_right, bottom_right, bottom_left],
        ),
        (
            "Pyramid - Front",
            [apex, bottom_right, bottom_left, bottom_left],
        ),
        ("Pyramid - Right", [apex, bottom_right, bottom_right, apex]),
        ("Pyramid - Left", [apex, bottom_left, bottom_left, apex]),
    ]
}

fn cylinder(w: f64, h: f64) -> Vec<(&'static str, Quad)> {
    let size = w.min(h) * 0.3;
    let (cx, cy) = (w * 0.5, h * 0.5);
    let half = size / 2.0;
    let offset = size * 0.25;

    vec![
        (
            "Cylinder - Front",
            [
                p(cx - half, cy - half),
                p(cx + half, cy - half),
                p(cx + half, cy + half),
                p(cx - half, cy + half),
            ],
        ),
        (
            "Cylinder - Top",
            [
                p(cx - half, cy - half),
                p(cx + half, cy - half),
                p(cx + half + offset, cy - half - offset * 0.5),
                p(cx - half + offset, cy - half - offset * 0.5),
            ],
        ),
        (
            "Cylinder - Side",
            [
                p(cx + half, cy - half),
                p(cx + half + offset, cy - half - offset * 0.5),
                p(cx + half + offset, cy + half - offset * 0.5),
                p(cx + half, cy + half),
            ],
        ),
    ]
}

fn house(w: f64, h: f64) -> Vec<(&'static str, Quad)> {
    let wall_w = w.min(h) * 0.25;
    let wall_h = w.min(h) * 0.35;
    let (cx, cy) = (w * 0.5, h * 0.5);
    let depth = wall_w * 0.3;
    let (hw, hh) = (wall_w / 2.0, wall_h / 2.0);

    vec![
        (
            "House - Front Wall",
            [
                p(cx - hw, cy - hh),
                p(cx + hw, cy - hh),
                p(cx + hw, cy + hh),
                p(cx - hw, cy + hh),
            ],
        ),
        (
            "House - Left Wall",
            [
                p(cx - hw, cy - hh),
                p(cx - hw + depth, cy - hh - depth * 0.3),
                p(cx - hw + depth, cy + hh - depth * 0.3),
                p(cx - hw, cy + hh),
            ],
        ),
        (
            "House - Right Wall",
            [
                p(cx + hw, cy - hh),
                p(cx + hw + depth, cy - hh - depth * 0.3),
                p(cx + hw + depth, cy + hh - depth * 0.3),
                p(cx + hw, cy + hh),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_preset() {
        let quad = quad_preset("center", 1000.0, 800.0, None).unwrap();
        assert_eq!(
            quad,
            [
                p(260.0, 160.0),
                p(740.0, 160.0),
                p(740.0, 640.0),
                p(260.0, 640.0)
            ]
        );
    }

    #[test]
    fn test_fullscreen_without_reserved_area() {
        let quad = quad_preset("fullscreen", 800.0, 600.0, None).unwrap();
        assert_eq!(quad, [p(0.0, 0.0), p(800.0, 0.0), p(800.0, 600.0), p(0.0, 600.0)]);
    }

    #[test]
    fn test_fullscreen_avoids_reserved_area() {
        let panel = Rect::new(0.0, 450.0, 300.0, 600.0);
        let quad = quad_preset("fullscreen", 800.0, 600.0, Some(&panel)).unwrap();
        assert_eq!(quad[2], p(800.0, 450.0));
        assert_eq!(quad[3], p(300.0, 450.0));
    }

    #[test]
    fn test_trapezoid_fallback_left_edge() {
        let quad = quad_preset("trapezoid", 1000.0, 500.0, None).unwrap();
        assert_eq!(quad[3], p(100.0, 500.0));
    }

    #[test]
    fn test_unknown_presets() {
        assert!(quad_preset("spiral", 10.0, 10.0, None).is_none());
        assert!(shape_preset("dodecahedron", 10.0, 10.0).is_none());
    }

    #[test]
    fn test_every_preset_has_four_corners() {
        for name in QUAD_PRESETS {
            assert!(quad_preset(name, 640.0, 480.0, None).is_some(), "{}", name);
        }
        for name in SHAPE_PRESETS {
            let faces = shape_preset(name, 640.0, 480.0).unwrap();
            assert!(faces.len() >= 3, "{}", name);
            for (_, quad) in faces {
                assert_eq!(quad.len(), 4);
            }
        }
    }

    #[test]
    fn test_shape_presets_are_deterministic() {
        let a = shape_preset("house", 1920.0, 1080.0).unwrap();
        let b = shape_preset("house", 1920.0, 1080.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pyramid_faces_degenerate() {
        let faces = shape_preset("pyramid", 1000.0, 1000.0).unwrap();
        assert_eq!(faces.len(), 4);
        let (name, front) = &faces[1];
        assert_eq!(name, "Pyramid - Front");
        assert_eq!(front[2], front[3]);
    }

    #[test]
    fn test_cube_front_is_square() {
        let faces = shape_preset("cube", 1000.0, 1000.0).unwrap();
        let (_, front) = &faces[0];
        assert_eq!(front[0], p(350.0, 350.0));
        assert_eq!(front[2], p(650.0, 650.0));
    }
}
