//! Corner handle dragging and keyboard nudging
//!
//! Only the active surface's four handles are interactive. A drag is bound
//! to (surface id, corner) with the pointer offset captured at press time, so
//! the corner follows the pointer without snapping. Nothing is clamped:
//! corners may leave the viewport.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MapperError, MapperResult};
use crate::geometry::{translate_quad, Point, CORNER_LABELS};
use crate::state::ApplicationState;
use crate::surface::SurfaceId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSession {
    pub surface_id: SurfaceId,
    pub corner: usize,
    /// Pointer position minus corner position at press time
    pub offset: Point,
}

/// Arrow-key direction for nudging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Parse a key name ("ArrowUp", "up", ...)
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim_start_matches("Arrow").to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    fn delta(self, step: f64) -> (f64, f64) {
        match self {
            Direction::Up => (0.0, -step),
            Direction::Down => (0.0, step),
            Direction::Left => (-step, 0.0),
            Direction::Right => (step, 0.0),
        }
    }
}

/// A keyboard shortcut from the control page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// Arrow keys; Shift takes the coarse step
    Nudge { direction: Direction, coarse: bool },
    /// 1-4 pick a corner, Escape clears the pick
    SelectCorner(Option<usize>),
    /// Ctrl+Z
    Undo,
    /// Ctrl+Shift+Z or Ctrl+Y
    Redo,
    /// Delete or Backspace
    DeleteActive,
}

impl KeyCommand {
    /// Map a DOM key name plus modifiers. Cmd counts as Ctrl.
    pub fn from_key(key: &str, ctrl: bool, shift: bool) -> Option<Self> {
        if let Some(direction) = Direction::from_key(key).filter(|_| key.starts_with("Arrow")) {
            return Some(KeyCommand::Nudge {
                direction,
                coarse: shift,
            });
        }

        let lower = key.to_ascii_lowercase();
        if ctrl {
            return match lower.as_str() {
                "z" if shift => Some(KeyCommand::Redo),
                "z" => Some(KeyCommand::Undo),
                "y" => Some(KeyCommand::Redo),
                _ => None,
            };
        }

        match lower.as_str() {
            "1" | "2" | "3" | "4" => lower
                .parse::<usize>()
                .ok()
                .map(|n| KeyCommand::SelectCorner(Some(n - 1))),
            "escape" => Some(KeyCommand::SelectCorner(None)),
            "delete" | "backspace" => Some(KeyCommand::DeleteActive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NudgeSteps {
    pub fine: f64,
    pub coarse: f64,
}

impl Default for NudgeSteps {
    fn default() -> Self {
        Self {
            fine: 1.0,
            coarse: 10.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Interaction {
    drag: Option<DragSession>,
}

impl Interaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drag(&self) -> Option<&DragSession> {
        self.drag.as_ref()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Press at `pos`: grab the nearest active handle within `radius`
    pub fn pointer_down(&mut self, state: &mut ApplicationState, pos: Point, radius: f64) -> bool {
        let Ok(surface) = state.active() else {
            return false;
        };

        let hit = surface
            .corners
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.distance_to(pos)))
            .filter(|(_, d)| *d <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let Some((corner, _)) = hit else {
            return false;
        };
        let grabbed = surface.corners[corner];
        let surface_id = surface.id;

        self.drag = Some(DragSession {
            surface_id,
            corner,
            offset: Point::new(pos.x - grabbed.x, pos.y - grabbed.y),
        });
        // Infallible: corner comes from the hit-test above
        let _ = state.set_selected_corner(Some(corner));
        debug!("Drag start: surface {} {}", surface_id, CORNER_LABELS[corner]);
        true
    }

    /// Move the dragged corner so it stays under the pointer
    pub fn pointer_move(&mut self, state: &mut ApplicationState, pos: Point) -> bool {
        let Some(drag) = self.drag else {
            return false;
        };
        let target = Point::new(pos.x - drag.offset.x, pos.y - drag.offset.y);
        match state.mutate_corner(drag.surface_id, drag.corner, target) {
            Ok(()) => true,
            Err(_) => {
                // Surface went away mid-drag
                self.drag = None;
                false
            }
        }
    }

    /// End the drag. Returns true when a snapshot should be scheduled.
    pub fn pointer_up(&mut self) -> bool {
        match self.drag.take() {
            Some(drag) => {
                debug!("Drag end: surface {} {}", drag.surface_id, CORNER_LABELS[drag.corner]);
                true
            }
            None => false,
        }
    }

    pub fn pointer_cancel(&mut self) -> bool {
        self.pointer_up()
    }

    /// Drop the drag without scheduling anything (active surface changed)
    pub fn reset(&mut self) {
        self.drag = None;
    }
}

/// Nudge the selected corner, or the whole active quad when none is selected
pub fn nudge(
    state: &mut ApplicationState,
    direction: Direction,
    coarse: bool,
    steps: &NudgeSteps,
) -> MapperResult<()> {
    let step = if coarse { steps.coarse } else { steps.fine };
    let (dx, dy) = direction.delta(step);
    let selected = state.selected_corner();
    let surface = state.active_mut()?;

    match selected {
        Some(index) => surface.corners[index] = surface.corners[index].offset(dx, dy),
        None => translate_quad(&mut surface.corners, dx, dy),
    }
    Ok(())
}

/// Select a corner for keyboard nudging (`None` moves all four)
pub fn select_corner(state: &mut ApplicationState, corner: Option<usize>) -> MapperResult<()> {
    if state.active_surface_id().is_none() {
        return Err(MapperError::invalid_op("no active surface"));
    }
    state.set_selected_corner(corner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Viewport;

    fn setup() -> (ApplicationState, SurfaceId) {
        let mut state = ApplicationState::new(Viewport::new(960.0, 540.0, 1.0));
        let id = state.create(None);
        (state, id)
    }

    #[test]
    fn test_drag_keeps_offset() {
        let (mut state, id) = setup();
        let mut ix = Interaction::new();
        // Corner 0 sits at (96, 54); press 3px right of it
        assert!(ix.pointer_down(&mut state, Point::new(99.0, 54.0), 12.0));
        assert_eq!(state.selected_corner(), Some(0));

        ix.pointer_move(&mut state, Point::new(13.0, 10.0));
        assert_eq!(state.get(id).unwrap().corners[0], Point::new(10.0, 10.0));

        assert!(ix.pointer_up());
        assert!(!ix.pointer_up());
    }

    #[test]
    fn test_drag_is_not_clamped() {
        let (mut state, id) = setup();
        let mut ix = Interaction::new();
        ix.pointer_down(&mut state, Point::new(864.0, 486.0), 12.0);
        ix.pointer_move(&mut state, Point::new(5000.0, -300.0));
        assert_eq!(state.get(id).unwrap().corners[2], Point::new(5000.0, -300.0));
    }

    #[test]
    fn test_miss_does_nothing() {
        let (mut state, _) = setup();
        let mut ix = Interaction::new();
        assert!(!ix.pointer_down(&mut state, Point::new(480.0, 270.0), 12.0));
        assert!(!ix.pointer_move(&mut state, Point::new(0.0, 0.0)));
        assert!(!ix.pointer_cancel());
    }

    #[test]
    fn test_only_active_surface_is_hit() {
        let (mut state, a) = setup();
        let b = state.create(None);
        state.set_corners(b, [
            Point::new(500.0, 500.0),
            Point::new(600.0, 500.0),
            Point::new(600.0, 530.0),
            Point::new(500.0, 530.0),
        ]).unwrap();
        let mut ix = Interaction::new();
        assert!(!ix.pointer_down(&mut state, Point::new(500.0, 500.0), 12.0));

        state.set_active(b).unwrap();
        assert!(ix.pointer_down(&mut state, Point::new(500.0, 500.0), 12.0));
        assert_eq!(ix.drag().unwrap().surface_id, b);
        assert_ne!(ix.drag().unwrap().surface_id, a);
    }

    #[test]
    fn test_nudge_selected_corner() {
        let (mut state, id) = setup();
        select_corner(&mut state, Some(1)).unwrap();
        nudge(&mut state, Direction::Left, false, &NudgeSteps::default()).unwrap();
        nudge(&mut state, Direction::Down, true, &NudgeSteps::default()).unwrap();
        let s = state.get(id).unwrap();
        assert_eq!(s.corners[1], Point::new(863.0, 64.0));
        assert_eq!(s.corners[0], Point::new(96.0, 54.0));
    }

    #[test]
    fn test_nudge_all_corners() {
        let (mut state, id) = setup();
        nudge(&mut state, Direction::Up, true, &NudgeSteps::default()).unwrap();
        let s = state.get(id).unwrap();
        assert_eq!(s.corners[0], Point::new(96.0, 44.0));
        assert_eq!(s.corners[3], Point::new(96.0, 476.0));
    }

    #[test]
    fn test_select_corner_range() {
        let (mut state, _) = setup();
        assert!(select_corner(&mut state, Some(4)).is_err());
        assert!(select_corner(&mut state, None).is_ok());
    }

    #[test]
    fn test_key_commands() {
        assert_eq!(
            KeyCommand::from_key("ArrowLeft", false, true),
            Some(KeyCommand::Nudge {
                direction: Direction::Left,
                coarse: true
            })
        );
        assert_eq!(KeyCommand::from_key("3", false, false), Some(KeyCommand::SelectCorner(Some(2))));
        assert_eq!(KeyCommand::from_key("Escape", false, false), Some(KeyCommand::SelectCorner(None)));
        assert_eq!(KeyCommand::from_key("z", true, false), Some(KeyCommand::Undo));
        // Shift turns the key into "Z"
        assert_eq!(KeyCommand::from_key("Z", true, true), Some(KeyCommand::Redo));
        assert_eq!(KeyCommand::from_key("y", true, false), Some(KeyCommand::Redo));
        assert_eq!(KeyCommand::from_key("Backspace", false, false), Some(KeyCommand::DeleteActive));
        assert_eq!(KeyCommand::from_key("Delete", false, false), Some(KeyCommand::DeleteActive));
        assert_eq!(KeyCommand::from_key("5", false, false), None);
        assert_eq!(KeyCommand::from_key("z", false, false), None);
        assert_eq!(KeyCommand::from_key("up", false, false), None);
    }

    #[test]
    fn test_direction_from_key() {
        assert_eq!(Direction::from_key("ArrowUp"), Some(Direction::Up));
        assert_eq!(Direction::from_key("right"), Some(Direction::Right));
        assert_eq!(Direction::from_key("Enter"), None);
    }
}
