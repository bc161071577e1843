//! Project documents: JSON export and validated import
//!
//! Media is never persisted, so every imported surface starts without media.
//! Import validates the whole document before touching the state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{MapperError, MapperResult};
use crate::geometry::{Point, Quad};
use crate::state::ApplicationState;
use crate::surface::{SurfaceId, DEFAULT_BRIGHTNESS, DEFAULT_CONTRAST, DEFAULT_ROTATION};

/// Positions of the two global color sliders in the control panel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalSliders {
    pub brightness: f32,
    pub contrast: f32,
}

impl Default for GlobalSliders {
    fn default() -> Self {
        Self {
            brightness: DEFAULT_BRIGHTNESS,
            contrast: DEFAULT_CONTRAST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSurface {
    pub id: SurfaceId,
    pub name: String,
    pub corners: Vec<Point>,
    pub brightness: f32,
    pub contrast: f32,
    pub rotation: f32,
    pub is_video: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub surfaces: Vec<ProjectSurface>,
    pub active_surface_id: Option<SurfaceId>,
    pub global_brightness: f32,
    pub global_contrast: f32,
}

impl ProjectDocument {
    pub fn to_json(&self) -> MapperResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MapperError::project(format!("failed to serialize project: {}", e)))
    }
}

/// Snapshot the state into a project document
pub fn export(state: &ApplicationState, sliders: &GlobalSliders) -> ProjectDocument {
    ProjectDocument {
        surfaces: state
            .surfaces()
            .iter()
            .map(|s| ProjectSurface {
                id: s.id,
                name: s.name.clone(),
                corners: s.corners.to_vec(),
                brightness: s.brightness,
                contrast: s.contrast,
                rotation: s.rotation,
                is_video: s.is_video,
            })
            .collect(),
        active_surface_id: state.active_surface_id(),
        global_brightness: sliders.brightness,
        global_contrast: sliders.contrast,
    }
}

/// A surface entry that passed validation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingSurface {
    #[serde(default)]
    name: Option<String>,
    /// Missing or null keeps the new surface's default quad
    #[serde(default)]
    corners: Option<Vec<Point>>,
    #[serde(default)]
    brightness: Option<f32>,
    #[serde(default)]
    contrast: Option<f32>,
    #[serde(default)]
    rotation: Option<f32>,
    #[serde(default)]
    is_video: Option<bool>,
}

struct ValidatedProject {
    surfaces: Vec<(IncomingSurface, Option<Quad>)>,
    active_surface_id: Option<SurfaceId>,
    global_brightness: Option<f32>,
    global_contrast: Option<f32>,
}

/// Missing, null, zero and NaN all count as "unset"
fn truthy(value: Option<f32>) -> Option<f32> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

fn validate(text: &str) -> MapperResult<ValidatedProject> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| MapperError::project(format!("not valid JSON: {}", e)))?;

    let entries = doc
        .get("surfaces")
        .ok_or_else(|| MapperError::project("missing \"surfaces\""))?
        .as_array()
        .ok_or_else(|| MapperError::project("\"surfaces\" is not an array"))?;
    if entries.is_empty() {
        return Err(MapperError::project("project has no surfaces"));
    }

    let mut surfaces = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let surface: IncomingSurface = serde_json::from_value(entry.clone())
            .map_err(|e| MapperError::project(format!("surface {}: {}", index, e)))?;
        let quad = match &surface.corners {
            Some(corners) => {
                let quad: Quad = corners.as_slice().try_into().map_err(|_| {
                    MapperError::project(format!(
                        "surface {}: expected 4 corners, found {}",
                        index,
                        corners.len()
                    ))
                })?;
                Some(quad)
            }
            None => None,
        };
        surfaces.push((surface, quad));
    }

    let active_surface_id = doc
        .get("activeSurfaceId")
        .and_then(Value::as_u64)
        .and_then(|id| SurfaceId::try_from(id).ok());
    let number = |key: &str| doc.get(key).and_then(Value::as_f64).map(|v| v as f32);

    Ok(ValidatedProject {
        surfaces,
        active_surface_id,
        global_brightness: number("globalBrightness"),
        global_contrast: number("globalContrast"),
    })
}

/// Replace all surfaces with the ones described by `text`.
///
/// On error the state and sliders are left exactly as they were. Ids are
/// reassigned from zero in document order.
pub fn import(state: &mut ApplicationState, sliders: &mut GlobalSliders, text: &str) -> MapperResult<()> {
    let project = validate(text)?;

    // Releases every texture and media source
    state.reset();

    let mut created = Vec::with_capacity(project.surfaces.len());
    for (incoming, quad) in project.surfaces {
        let id = state.create(incoming.name);
        if let Some(surface) = state.get_mut(id) {
            if let Some(quad) = quad {
                surface.corners = quad;
            }
            surface.brightness = truthy(incoming.brightness).unwrap_or(DEFAULT_BRIGHTNESS);
            surface.contrast = truthy(incoming.contrast).unwrap_or(DEFAULT_CONTRAST);
            surface.rotation = incoming.rotation.unwrap_or(DEFAULT_ROTATION);
            surface.is_video = incoming.is_video.unwrap_or(false);
        }
        created.push(id);
    }

    let active = project
        .active_surface_id
        .filter(|id| created.contains(id))
        .or_else(|| created.first().copied());
    if let Some(id) = active {
        state.set_active(id)?;
    }

    if let Some(b) = project.global_brightness {
        sliders.brightness = b;
    }
    if let Some(c) = project.global_contrast {
        sliders.contrast = c;
    }

    info!("Imported project with {} surfaces", created.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{default_quad, Viewport};
    use crate::media::Media;
    use image::{Rgba, RgbaImage};
    use std::time::Instant;

    fn state() -> ApplicationState {
        ApplicationState::new(Viewport::new(960.0, 540.0, 1.0))
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut s = state();
        let a = s.create(None);
        let b = s.create(Some("Wall".into()));
        s.mutate_corner(a, 2, Point::new(-40.0, 1200.5)).unwrap();
        s.get_mut(b).unwrap().rotation = 1.25;
        s.get_mut(b).unwrap().attach_media(
            Media::Image(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]))),
            Instant::now(),
        );
        let c = s.create(Some("Clip".into()));
        s.get_mut(c).unwrap().is_video = true;
        s.set_active(b).unwrap();

        let doc = export(&s, &GlobalSliders::default());
        let json = doc.to_json().unwrap();

        let mut restored = state();
        let mut sliders = GlobalSliders::default();
        import(&mut restored, &mut sliders, &json).unwrap();

        assert_eq!(restored.len(), 3);
        let (ra, rb, rc) = (&restored.surfaces()[0], &restored.surfaces()[1], &restored.surfaces()[2]);
        assert_eq!(ra.corners, s.get(a).unwrap().corners);
        assert_eq!(rb.name, "Wall");
        assert_eq!(rb.rotation, 1.25);
        // Media is never persisted, the video flag is
        assert!(!rb.is_video);
        assert!(!rb.has_media());
        assert_eq!(rc.name, "Clip");
        assert!(rc.is_video);
        assert!(!rc.has_media());
        assert_eq!(restored.active_surface_id(), Some(1));
    }

    #[test]
    fn test_document_field_names() {
        let mut s = state();
        s.create(None);
        let json = export(&s, &GlobalSliders::default()).to_json().unwrap();
        assert!(json.contains("\"activeSurfaceId\""));
        assert!(json.contains("\"isVideo\""));
        assert!(json.contains("\"globalBrightness\""));
        assert!(json.contains("\"globalContrast\""));
    }

    #[test]
    fn test_ids_reassigned_from_zero() {
        let text = r#"{"surfaces": [
            {"id": 7, "name": "A", "corners": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}]},
            {"id": 3, "corners": [{"x":0,"y":0},{"x":2,"y":0},{"x":2,"y":2},{"x":0,"y":2}]}
        ], "activeSurfaceId": 7}"#;
        let mut s = state();
        s.create(None);
        s.create(None);
        s.create(None);
        let mut sliders = GlobalSliders::default();
        import(&mut s, &mut sliders, text).unwrap();

        let ids: Vec<_> = s.surfaces().iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(s.surfaces()[1].name, "Surface 2");
        // 7 names no surface any more: first one wins
        assert_eq!(s.active_surface_id(), Some(0));
        assert_eq!(s.next_id(), 2);
    }

    #[test]
    fn test_falsy_color_fields_fall_back() {
        let text = r#"{"surfaces": [{
            "corners": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}],
            "brightness": 0, "contrast": 0, "rotation": 0
        }, {
            "corners": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}],
            "brightness": 0.25, "contrast": null, "rotation": 3.0
        }]}"#;
        let mut s = state();
        let mut sliders = GlobalSliders::default();
        import(&mut s, &mut sliders, text).unwrap();

        let first = &s.surfaces()[0];
        assert_eq!(first.contrast, 1.0);
        assert_eq!(first.brightness, 0.0);
        assert_eq!(first.rotation, 0.0);
        let second = &s.surfaces()[1];
        assert_eq!(second.brightness, 0.25);
        assert_eq!(second.contrast, 1.0);
        assert_eq!(second.rotation, 3.0);
        assert!(!second.is_video);
    }

    #[test]
    fn test_missing_corners_keep_default_quad() {
        let text = r#"{"surfaces": [
            {"name": "X"},
            {"name": "Y", "corners": null}
        ]}"#;
        let mut s = state();
        let mut sliders = GlobalSliders::default();
        import(&mut s, &mut sliders, text).unwrap();

        assert_eq!(s.len(), 2);
        let expected = default_quad(s.viewport());
        assert_eq!(s.surfaces()[0].name, "X");
        assert_eq!(s.surfaces()[0].corners, expected);
        assert_eq!(s.surfaces()[1].corners, expected);
        assert_eq!(expected[0], Point::new(96.0, 54.0));
    }

    #[test]
    fn test_global_sliders_applied() {
        let text = r#"{"surfaces": [{"corners": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}]}],
            "globalBrightness": 0.3, "globalContrast": 1.4}"#;
        let mut s = state();
        let mut sliders = GlobalSliders::default();
        import(&mut s, &mut sliders, text).unwrap();
        assert_eq!(sliders.brightness, 0.3);
        assert_eq!(sliders.contrast, 1.4);
    }

    #[test]
    fn test_invalid_documents_leave_state_untouched() {
        let bad = [
            "not json",
            "{}",
            r#"{"surfaces": {}}"#,
            r#"{"surfaces": []}"#,
            r#"{"surfaces": [{"corners": [{"x":0,"y":0}]}]}"#,
            r#"{"surfaces": [{"corners": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}]}, {"corners": "none"}]}"#,
            r#"{"surfaces": [{"corners": [{"x":"a","y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}]}]}"#,
        ];

        for text in bad {
            let mut s = state();
            let a = s.create(Some("Keep".into()));
            s.mutate_corner(a, 0, Point::new(1.0, 2.0)).unwrap();
            let mut sliders = GlobalSliders {
                brightness: 0.5,
                contrast: 2.0,
            };

            let err = import(&mut s, &mut sliders, text).unwrap_err();
            assert!(matches!(err, MapperError::InvalidProjectFile(_)), "{}", text);
            assert_eq!(s.len(), 1, "{}", text);
            assert_eq!(s.get(a).unwrap().name, "Keep");
            assert_eq!(s.get(a).unwrap().corners[0], Point::new(1.0, 2.0));
            assert_eq!(sliders.contrast, 2.0);
        }
    }
}
