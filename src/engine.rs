//! The mapping engine: one owned object behind every command
//!
//! All mutation goes through `&mut Engine`, so rendering and edits never
//! interleave. Edits that should be undoable schedule a debounced snapshot;
//! `tick` takes it once the edits settle.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MapperError, MapperResult};
use crate::geometry::{degrees_to_radians, Point, Rect, Viewport};
use crate::history::{History, Snapshot, SnapshotScheduler};
use crate::interaction::{self, Direction, Interaction, KeyCommand, NudgeSteps};
use crate::media::{LoadedMedia, MediaLimits};
use crate::presets;
use crate::project::{self, GlobalSliders, ProjectDocument};
use crate::render::{Frame, RenderStats, Renderer};
use crate::snow::SnowField;
use crate::state::ApplicationState;
use crate::surface::{Appearance, SurfaceId, SurfaceInfo};

/// Longest simulation step for the overlay after a stall
const MAX_FRAME_DT: f64 = 0.1;

/// Config-derived engine settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub history_capacity: usize,
    pub debounce: Duration,
    pub video_refresh: Duration,
    pub nudge: NudgeSteps,
    pub handle_radius: f64,
    pub reserved_area: Option<Rect>,
    pub media_limits: MediaLimits,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_capacity: config.history.capacity,
            debounce: config.debounce(),
            video_refresh: config.video_refresh(),
            nudge: config.interaction.nudge_steps(),
            handle_radius: config.interaction.handle_radius,
            reserved_area: config.reserved_area,
            media_limits: config.media.limits(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Pointer event phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

impl PointerPhase {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "down" => Some(PointerPhase::Down),
            "move" => Some(PointerPhase::Move),
            "up" => Some(PointerPhase::Up),
            "cancel" => Some(PointerPhase::Cancel),
            _ => None,
        }
    }
}

/// Everything the control UI shows
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub surfaces: Vec<SurfaceInfo>,
    pub active_surface_id: Option<SurfaceId>,
    pub selected_corner: Option<usize>,
    pub viewport: Viewport,
    pub can_undo: bool,
    pub can_redo: bool,
    pub history_len: usize,
    pub history_capacity: usize,
    pub snapshot_pending: bool,
    pub debounce_ms: u64,
    pub dragging: bool,
    pub snow_enabled: bool,
    pub snow_particles: usize,
    pub sliders: GlobalSliders,
    pub render: RenderStats,
}

pub struct Engine {
    state: ApplicationState,
    history: History,
    scheduler: SnapshotScheduler,
    interaction: Interaction,
    renderer: Renderer,
    snow: SnowField,
    sliders: GlobalSliders,
    settings: EngineSettings,
    last_render: Option<Instant>,
}

impl Engine {
    /// Start with one default surface and a baseline snapshot
    pub fn new(viewport: Viewport, settings: EngineSettings) -> Self {
        let mut state = ApplicationState::new(viewport);
        state.create(None);

        let mut history = History::new(settings.history_capacity);
        history.push(Snapshot::capture(&state));

        info!(
            "Engine ready: {}x{} viewport, history capacity {}",
            viewport.width, viewport.height, settings.history_capacity
        );

        Self {
            state,
            history,
            scheduler: SnapshotScheduler::new(settings.debounce),
            interaction: Interaction::new(),
            renderer: Renderer::new(settings.video_refresh),
            snow: SnowField::new(),
            sliders: GlobalSliders::default(),
            settings,
            last_render: None,
        }
    }

    pub fn state(&self) -> &ApplicationState {
        &self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn sliders(&self) -> GlobalSliders {
        self.sliders
    }

    /// Point the global sliders at the active surface's color controls
    fn sync_sliders(&mut self) {
        if let Ok(surface) = self.state.active() {
            self.sliders = GlobalSliders {
                brightness: surface.brightness,
                contrast: surface.contrast,
            };
        }
    }

    fn schedule_snapshot(&mut self, now: Instant) {
        self.scheduler.request(now);
    }

    fn capture_snapshot(&mut self) {
        self.history.push(Snapshot::capture(&self.state));
    }

    /// Take the pending snapshot if its debounce window has passed
    pub fn tick(&mut self, now: Instant) {
        if self.scheduler.poll(now) {
            self.capture_snapshot();
        }
    }

    // Surfaces

    pub fn create_surface(&mut self, name: Option<String>, now: Instant) -> SurfaceId {
        let id = self.state.create(name);
        self.schedule_snapshot(now);
        id
    }

    pub fn delete_surface(&mut self, id: SurfaceId, now: Instant) -> MapperResult<()> {
        self.state.delete(id)?;
        if self.interaction.drag().map(|d| d.surface_id) == Some(id) {
            self.interaction.reset();
        }
        self.sync_sliders();
        self.schedule_snapshot(now);
        Ok(())
    }

    /// Make another surface's handles interactive. Geometry is untouched.
    pub fn select_surface(&mut self, id: SurfaceId) -> MapperResult<()> {
        self.state.set_active(id)?;
        self.interaction.reset();
        self.sync_sliders();
        Ok(())
    }

    pub fn set_corner(&mut self, id: SurfaceId, index: usize, point: Point, now: Instant) -> MapperResult<()> {
        self.state.mutate_corner(id, index, point)?;
        self.schedule_snapshot(now);
        Ok(())
    }

    pub fn set_appearance(&mut self, id: SurfaceId, change: Appearance, now: Instant) -> MapperResult<()> {
        self.state.set_appearance(id, change)?;
        if self.state.active_surface_id() == Some(id) {
            match change {
                Appearance::Brightness(v) => self.sliders.brightness = v,
                Appearance::Contrast(v) => self.sliders.contrast = v,
                _ => {}
            }
        }
        self.schedule_snapshot(now);
        Ok(())
    }

    /// Rotation arrives in degrees from the controls
    pub fn set_rotation_degrees(&mut self, id: SurfaceId, degrees: f64, now: Instant) -> MapperResult<()> {
        let radians = degrees_to_radians(degrees) as f32;
        self.set_appearance(id, Appearance::Rotation(radians), now)
    }

    /// Install decoded media. Returns whether it was flagged oversized.
    pub fn attach_media(&mut self, id: SurfaceId, loaded: LoadedMedia, now: Instant) -> MapperResult<bool> {
        let Some(surface) = self.state.get_mut(id) else {
            warn!("Surface {} was deleted before its media finished loading", id);
            return Err(MapperError::invalid_op(format!("no surface with id {}", id)));
        };
        info!("Surface {} media: {}", id, loaded.media.describe());
        surface.attach_media(loaded.media, now);
        Ok(loaded.oversized)
    }

    // Presets

    pub fn apply_preset(&mut self, name: &str, now: Instant) -> MapperResult<()> {
        let vp = *self.state.viewport();
        let quad = presets::quad_preset(name, vp.width, vp.height, self.settings.reserved_area.as_ref())
            .ok_or_else(|| MapperError::invalid_op(format!("unknown preset: {}", name)))?;
        let id = self.state.active()?.id;
        self.state.set_corners(id, quad)?;
        debug!("Applied preset {} to surface {}", name, id);
        self.schedule_snapshot(now);
        Ok(())
    }

    /// Create the faces of a shape preset as new surfaces
    pub fn apply_shape(&mut self, name: &str, now: Instant) -> MapperResult<Vec<SurfaceId>> {
        let vp = *self.state.viewport();
        let faces = presets::shape_preset(name, vp.width, vp.height)
            .ok_or_else(|| MapperError::invalid_op(format!("unknown shape: {}", name)))?;

        let mut ids = Vec::with_capacity(faces.len());
        for (face_name, quad) in faces {
            let id = self.state.create(Some(face_name));
            self.state.set_corners(id, quad)?;
            ids.push(id);
        }
        info!("Created {} shape with {} faces", name, ids.len());
        self.schedule_snapshot(now);
        Ok(ids)
    }

    // Project

    pub fn export_project(&self) -> ProjectDocument {
        project::export(&self.state, &self.sliders)
    }

    /// Replace every surface from a project document and restart history.
    /// The sliders end up mirroring the imported active surface.
    pub fn import_project(&mut self, text: &str) -> MapperResult<()> {
        project::import(&mut self.state, &mut self.sliders, text)?;
        self.sync_sliders();
        self.interaction.reset();
        self.scheduler.cancel();
        self.history.clear();
        self.capture_snapshot();
        Ok(())
    }

    // History

    /// Commit an edit still waiting on its debounce
    fn flush_pending(&mut self) {
        if self.scheduler.take_pending() {
            self.capture_snapshot();
        }
    }

    pub fn undo(&mut self) -> bool {
        self.flush_pending();
        match self.history.undo() {
            Some(snapshot) => {
                snapshot.restore(&mut self.state);
                self.sync_sliders();
                debug!("Undo -> {:?}", self.history.cursor());
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        self.flush_pending();
        match self.history.redo() {
            Some(snapshot) => {
                snapshot.restore(&mut self.state);
                self.sync_sliders();
                debug!("Redo -> {:?}", self.history.cursor());
                true
            }
            None => false,
        }
    }

    // Interaction

    pub fn pointer(&mut self, phase: PointerPhase, pos: Point, now: Instant) -> bool {
        match phase {
            PointerPhase::Down => {
                // Presses over the control panel never reach the handles
                if self.settings.reserved_area.is_some_and(|r| r.contains(pos)) {
                    return false;
                }
                self.interaction
                    .pointer_down(&mut self.state, pos, self.settings.handle_radius)
            }
            PointerPhase::Move => self.interaction.pointer_move(&mut self.state, pos),
            PointerPhase::Up | PointerPhase::Cancel => {
                let ended = if phase == PointerPhase::Up {
                    self.interaction.pointer_up()
                } else {
                    self.interaction.pointer_cancel()
                };
                if ended {
                    self.schedule_snapshot(now);
                }
                ended
            }
        }
    }

    pub fn nudge(&mut self, direction: Direction, coarse: bool, now: Instant) -> MapperResult<()> {
        interaction::nudge(&mut self.state, direction, coarse, &self.settings.nudge)?;
        self.schedule_snapshot(now);
        Ok(())
    }

    pub fn select_corner(&mut self, corner: Option<usize>) -> MapperResult<()> {
        interaction::select_corner(&mut self.state, corner)
    }

    /// Run a keyboard shortcut. Returns false when it had nothing to act on.
    pub fn key(&mut self, command: KeyCommand, now: Instant) -> MapperResult<bool> {
        match command {
            KeyCommand::Nudge { direction, coarse } => self.nudge(direction, coarse, now).map(|_| true),
            KeyCommand::SelectCorner(corner) => self.select_corner(corner).map(|_| true),
            KeyCommand::Undo => Ok(self.undo()),
            KeyCommand::Redo => Ok(self.redo()),
            KeyCommand::DeleteActive => {
                // The last surface stays; the key is simply ignored
                if self.state.len() <= 1 {
                    return Ok(false);
                }
                let id = self.state.active()?.id;
                self.delete_surface(id, now).map(|_| true)
            }
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        info!(
            "Viewport {}x{} @ {}x",
            viewport.width, viewport.height, viewport.device_pixel_ratio
        );
        self.state.set_viewport(viewport);
    }

    pub fn toggle_snow(&mut self) -> bool {
        let enabled = self.snow.toggle();
        info!("Snow overlay {}", if enabled { "on" } else { "off" });
        enabled
    }

    // Frame

    pub fn render(&mut self, now: Instant, frame: &mut Frame) {
        let dt = self
            .last_render
            .map(|last| now.saturating_duration_since(last).as_secs_f64().min(MAX_FRAME_DT))
            .unwrap_or(0.0);
        self.last_render = Some(now);

        let viewport = *self.state.viewport();
        self.snow.update(dt, &viewport, &mut rand::thread_rng());
        self.renderer.render(&mut self.state, &self.snow, frame, now);
    }

    pub fn info(&self) -> EngineInfo {
        let active = self.state.active_surface_id();
        EngineInfo {
            surfaces: self
                .state
                .surfaces()
                .iter()
                .map(|s| SurfaceInfo::from_surface(s, Some(s.id) == active))
                .collect(),
            active_surface_id: active,
            selected_corner: self.state.selected_corner(),
            viewport: *self.state.viewport(),
            can_undo: self.history.can_undo() || self.scheduler.is_pending(),
            can_redo: self.history.can_redo(),
            history_len: self.history.len(),
            history_capacity: self.history.capacity(),
            snapshot_pending: self.scheduler.is_pending(),
            debounce_ms: self.scheduler.delay().as_millis() as u64,
            dragging: self.interaction.is_dragging(),
            snow_enabled: self.snow.is_enabled(),
            snow_particles: self.snow.particles().len(),
            sliders: self.sliders,
            render: self.renderer.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Media;
    use image::{Rgba, RgbaImage};

    fn engine() -> Engine {
        Engine::new(Viewport::new(960.0, 540.0, 1.0), EngineSettings::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_starts_with_one_surface() {
        let e = engine();
        assert_eq!(e.state().len(), 1);
        assert_eq!(e.state().surfaces()[0].name, "Surface 1");
        assert_eq!(e.history().len(), 1);
        assert!(!e.history().can_undo());
    }

    #[test]
    fn test_drag_undo_redo() {
        let mut e = engine();
        let t0 = Instant::now();
        let id = e.state().active_surface_id().unwrap();

        assert!(e.pointer(PointerPhase::Down, Point::new(96.0, 54.0), t0));
        e.pointer(PointerPhase::Move, Point::new(50.0, 30.0), t0 + ms(16));
        e.pointer(PointerPhase::Move, Point::new(10.0, 10.0), t0 + ms(32));
        assert!(e.pointer(PointerPhase::Up, Point::new(10.0, 10.0), t0 + ms(40)));

        e.tick(t0 + ms(600));
        assert_eq!(e.history().len(), 2);

        assert!(e.undo());
        assert_eq!(e.state().get(id).unwrap().corners[0], Point::new(96.0, 54.0));
        assert!(e.redo());
        assert_eq!(e.state().get(id).unwrap().corners[0], Point::new(10.0, 10.0));
    }

    #[test]
    fn test_rapid_edits_coalesce_into_one_undo() {
        let mut e = engine();
        let t0 = Instant::now();
        let id = e.state().active_surface_id().unwrap();
        let before = e.state().get(id).unwrap().corners;

        for i in 0..8 {
            e.nudge(Direction::Right, false, t0 + ms(100 * i)).unwrap();
            e.tick(t0 + ms(100 * i + 50));
        }
        e.tick(t0 + ms(2000));
        assert_eq!(e.history().len(), 2);

        assert!(e.undo());
        assert_eq!(e.state().get(id).unwrap().corners, before);
        assert!(!e.undo());
    }

    #[test]
    fn test_undo_flushes_pending_edit() {
        let mut e = engine();
        let t0 = Instant::now();
        let id = e.state().active_surface_id().unwrap();
        e.set_corner(id, 1, Point::new(1.0, 1.0), t0).unwrap();

        // Still inside the debounce window
        assert!(e.undo());
        assert_eq!(e.state().get(id).unwrap().corners[1], Point::new(864.0, 54.0));
        assert!(e.redo());
        assert_eq!(e.state().get(id).unwrap().corners[1], Point::new(1.0, 1.0));
    }

    #[test]
    fn test_undo_never_changes_surface_count() {
        let mut e = engine();
        let t0 = Instant::now();
        let b = e.create_surface(None, t0);
        e.tick(t0 + ms(600));
        e.delete_surface(b, t0 + ms(700)).unwrap();
        e.tick(t0 + ms(1300));
        let c = e.create_surface(None, t0 + ms(1400));

        let count = e.state().len();
        while e.undo() {
            assert_eq!(e.state().len(), count);
        }
        assert!(e.state().get(b).is_none());
        assert!(e.state().get(c).is_some());
    }

    #[test]
    fn test_rotation_degrees() {
        let mut e = engine();
        let id = e.state().active_surface_id().unwrap();
        e.set_rotation_degrees(id, 180.0, Instant::now()).unwrap();
        assert_eq!(e.state().get(id).unwrap().rotation, std::f32::consts::PI);
        let info = e.info();
        assert!((info.surfaces[0].rotation_degrees - 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_cannot_delete_last_surface() {
        let mut e = engine();
        let id = e.state().active_surface_id().unwrap();
        assert!(matches!(
            e.delete_surface(id, Instant::now()),
            Err(MapperError::InvalidOperation(_))
        ));
        assert_eq!(e.state().len(), 1);
    }

    #[test]
    fn test_presets_and_shapes() {
        let mut e = engine();
        let t0 = Instant::now();
        e.apply_preset("top-half", t0).unwrap();
        let active = e.state().active().unwrap();
        assert_eq!(active.corners[2], Point::new(960.0, 270.0));

        let ids = e.apply_shape("cube", t0).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(e.state().len(), 4);
        assert_eq!(e.state().get(ids[0]).unwrap().name, "Cube - Front");

        assert!(e.apply_preset("nope", t0).is_err());
        assert!(e.apply_shape("nope", t0).is_err());
    }

    #[test]
    fn test_import_resets_history() {
        let mut e = engine();
        let t0 = Instant::now();
        e.create_surface(None, t0);
        e.tick(t0 + ms(600));
        let text = e.export_project().to_json().unwrap();

        e.import_project(&text).unwrap();
        assert_eq!(e.history().len(), 1);
        assert!(!e.history().can_undo());
        assert_eq!(e.state().len(), 2);

        assert!(e.import_project("{\"surfaces\": []}").is_err());
        assert_eq!(e.state().len(), 2);
    }

    #[test]
    fn test_media_for_deleted_surface_is_discarded() {
        let mut e = engine();
        let t0 = Instant::now();
        let b = e.create_surface(None, t0);
        e.delete_surface(b, t0).unwrap();
        let loaded = LoadedMedia {
            media: Media::Image(RgbaImage::from_pixel(1, 1, Rgba([1, 1, 1, 255]))),
            oversized: false,
        };
        assert!(e.attach_media(b, loaded, t0).is_err());
    }

    #[test]
    fn test_render_draws_attached_media() {
        let mut e = engine();
        let t0 = Instant::now();
        let id = e.state().active_surface_id().unwrap();
        let loaded = LoadedMedia {
            media: Media::Image(RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]))),
            oversized: false,
        };
        e.attach_media(id, loaded, t0).unwrap();

        let mut frame = Frame::new(1, 1);
        e.render(t0, &mut frame);
        assert_eq!((frame.width(), frame.height()), (960, 540));
        assert_eq!(frame.pixel(480, 270), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(5, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn test_select_surface_keeps_geometry() {
        let mut e = engine();
        let t0 = Instant::now();
        let a = e.state().active_surface_id().unwrap();
        let b = e.create_surface(None, t0);
        let before: Vec<_> = e.state().surfaces().iter().map(|s| s.corners).collect();
        e.set_appearance(b, Appearance::Contrast(1.5), t0).unwrap();
        e.select_surface(b).unwrap();
        assert_eq!(e.sliders().contrast, 1.5);
        let after: Vec<_> = e.state().surfaces().iter().map(|s| s.corners).collect();
        assert_eq!(before, after);
        assert_eq!(e.state().active_surface_id(), Some(b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sliders_follow_active_surface() {
        let mut e = engine();
        let t0 = Instant::now();
        let a = e.state().active_surface_id().unwrap();
        let b = e.create_surface(None, t0);
        e.select_surface(b).unwrap();
        e.set_appearance(b, Appearance::Brightness(0.4), t0).unwrap();
        assert_eq!(e.sliders().brightness, 0.4);

        // Deleting the active surface hands activity back to the first one
        e.delete_surface(b, t0).unwrap();
        assert_eq!(e.state().active_surface_id(), Some(a));
        assert_eq!(e.sliders().brightness, 0.0);
        assert_eq!(e.export_project().global_brightness, 0.0);

        e.set_appearance(a, Appearance::Contrast(2.0), t0 + ms(1000)).unwrap();
        e.tick(t0 + ms(2000));
        assert_eq!(e.sliders().contrast, 2.0);
        assert!(e.undo());
        assert_eq!(e.state().get(a).unwrap().contrast, 1.0);
        assert_eq!(e.sliders().contrast, 1.0);
        assert!(e.redo());
        assert_eq!(e.sliders().contrast, 2.0);
    }

    #[test]
    fn test_import_sliders_mirror_active_surface() {
        let text = r#"{"surfaces": [
            {"corners": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}]},
            {"corners": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1},{"x":0,"y":1}],
             "brightness": 0.2, "contrast": 1.5}
        ], "activeSurfaceId": 1, "globalBrightness": 0.9, "globalContrast": 0.5}"#;
        let mut e = engine();
        e.import_project(text).unwrap();
        assert_eq!(e.state().active_surface_id(), Some(1));
        assert_eq!(e.sliders().brightness, 0.2);
        assert_eq!(e.sliders().contrast, 1.5);
    }

    #[test]
    fn test_keyboard_shortcuts() {
        let mut e = engine();
        let t0 = Instant::now();
        let a = e.state().active_surface_id().unwrap();

        let press = |e: &mut Engine, key: &str, ctrl: bool, shift: bool| {
            let command = KeyCommand::from_key(key, ctrl, shift).unwrap();
            e.key(command, t0).unwrap()
        };

        assert!(press(&mut e, "2", false, false));
        assert_eq!(e.state().selected_corner(), Some(1));
        assert!(press(&mut e, "ArrowDown", false, true));
        assert_eq!(e.state().get(a).unwrap().corners[1], Point::new(864.0, 64.0));
        assert!(press(&mut e, "Escape", false, false));
        assert_eq!(e.state().selected_corner(), None);

        assert!(press(&mut e, "z", true, false));
        assert_eq!(e.state().get(a).unwrap().corners[1], Point::new(864.0, 54.0));
        assert!(press(&mut e, "Z", true, true));
        assert_eq!(e.state().get(a).unwrap().corners[1], Point::new(864.0, 64.0));
        assert!(press(&mut e, "z", true, false));
        assert!(press(&mut e, "y", true, false));
        assert_eq!(e.state().get(a).unwrap().corners[1], Point::new(864.0, 64.0));

        // Delete only acts while more than one surface exists
        assert!(!press(&mut e, "Delete", false, false));
        assert_eq!(e.state().len(), 1);
        let b = e.create_surface(None, t0);
        e.select_surface(b).unwrap();
        assert!(press(&mut e, "Backspace", false, false));
        assert_eq!(e.state().len(), 1);
        assert!(e.state().get(b).is_none());
    }

    #[test]
    fn test_reserved_area_blocks_presses() {
        let settings = EngineSettings {
            reserved_area: Some(Rect::new(0.0, 0.0, 200.0, 100.0)),
            ..EngineSettings::default()
        };
        let mut e = Engine::new(Viewport::new(960.0, 540.0, 1.0), settings);
        let t0 = Instant::now();
        assert!(!e.pointer(PointerPhase::Down, Point::new(96.0, 54.0), t0));
        assert!(e.pointer(PointerPhase::Down, Point::new(864.0, 486.0), t0));
    }
}
