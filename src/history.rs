//! Snapshot-based undo/redo
//!
//! Snapshots hold the editable geometry and color fields of every surface
//! plus the active pointer. They are captured on a trailing debounce, never
//! per intermediate drag frame. Restoring merges by surface id: surfaces
//! missing from the snapshot are left alone and deleted surfaces are not
//! brought back.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::geometry::Quad;
use crate::state::ApplicationState;
use crate::surface::SurfaceId;

/// Per-surface fields captured in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceSnapshot {
    pub id: SurfaceId,
    pub corners: Quad,
    pub brightness: f32,
    pub contrast: f32,
    pub rotation: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub surfaces: Vec<SurfaceSnapshot>,
    pub active_surface_id: Option<SurfaceId>,
}

impl Snapshot {
    /// Deep copy of the current state
    pub fn capture(state: &ApplicationState) -> Self {
        Self {
            surfaces: state
                .surfaces()
                .iter()
                .map(|s| SurfaceSnapshot {
                    id: s.id,
                    corners: s.corners,
                    brightness: s.brightness,
                    contrast: s.contrast,
                    rotation: s.rotation,
                })
                .collect(),
            active_surface_id: state.active_surface_id(),
        }
    }

    /// Write the snapshot back into matching surfaces.
    ///
    /// Never creates or deletes surfaces.
    pub fn restore(&self, state: &mut ApplicationState) {
        for saved in &self.surfaces {
            if let Some(surface) = state.get_mut(saved.id) {
                surface.corners = saved.corners;
                surface.brightness = saved.brightness;
                surface.contrast = saved.contrast;
                surface.rotation = saved.rotation;
            }
        }
        state.restore_active(self.active_surface_id);
    }
}

/// Bounded linear history with a cursor
#[derive(Debug)]
pub struct History {
    entries: Vec<Snapshot>,
    /// Index of the entry matching the current state, `None` when empty
    cursor: Option<usize>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a snapshot, dropping any redo entries first.
    ///
    /// Past capacity the oldest entry is evicted and the cursor stays put.
    pub fn push(&mut self, snapshot: Snapshot) {
        let keep = self.cursor.map(|c| c + 1).unwrap_or(0);
        self.entries.truncate(keep);

        self.entries.push(snapshot);
        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        } else {
            self.cursor = Some(keep);
        }
        debug!(
            "History: {} entries, cursor at {:?}",
            self.entries.len(),
            self.cursor
        );
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self) -> bool {
        match self.cursor {
            Some(c) => c + 1 < self.entries.len(),
            None => false,
        }
    }

    /// Step back and return the snapshot to restore
    pub fn undo(&mut self) -> Option<&Snapshot> {
        if !self.can_undo() {
            return None;
        }
        let c = self.cursor? - 1;
        self.cursor = Some(c);
        self.entries.get(c)
    }

    /// Step forward and return the snapshot to restore
    pub fn redo(&mut self) -> Option<&Snapshot> {
        if !self.can_redo() {
            return None;
        }
        let c = self.cursor? + 1;
        self.cursor = Some(c);
        self.entries.get(c)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}

/// Trailing debounce with a single pending slot.
///
/// Each request moves the deadline to `now + delay`, replacing any pending
/// one, so a burst of edits produces one capture after the last edit.
#[derive(Debug)]
pub struct SnapshotScheduler {
    delay: Duration,
    deadline: Option<Instant>,
}

impl SnapshotScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn request(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// True exactly once when the pending deadline has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Consume a pending request regardless of its deadline
    pub fn take_pending(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}
