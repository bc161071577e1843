//! Surface store: the ordered surface list and the active pointer
//!
//! Draw order is insertion order. Ids come from a monotonically increasing
//! counter and are never reused, except that importing a project resets the
//! counter along with the surface list.

use tracing::{debug, info};

use crate::error::{MapperError, MapperResult};
use crate::geometry::{default_quad, Point, Quad, Viewport};
use crate::surface::{Appearance, Surface, SurfaceId};

#[derive(Debug)]
pub struct ApplicationState {
    surfaces: Vec<Surface>,
    next_id: SurfaceId,
    active_surface_id: Option<SurfaceId>,
    /// Selected corner of the active surface (keyboard nudging)
    selected_corner: Option<usize>,
    viewport: Viewport,
}

impl ApplicationState {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            surfaces: Vec::new(),
            next_id: 0,
            active_surface_id: None,
            selected_corner: None,
            viewport,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Resize the render target. Stored corners are left untouched.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub(crate) fn surfaces_mut(&mut self) -> &mut [Surface] {
        &mut self.surfaces
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn next_id(&self) -> SurfaceId {
        self.next_id
    }

    pub fn active_surface_id(&self) -> Option<SurfaceId> {
        self.active_surface_id
    }

    pub fn selected_corner(&self) -> Option<usize> {
        self.selected_corner
    }

    pub fn set_selected_corner(&mut self, corner: Option<usize>) -> MapperResult<()> {
        if let Some(index) = corner {
            if index > 3 {
                return Err(MapperError::invalid_op(format!(
                    "corner index {} out of range (0-3)",
                    index
                )));
            }
        }
        self.selected_corner = corner;
        Ok(())
    }

    /// Create a surface with the default quad; the first surface becomes active
    pub fn create(&mut self, name: Option<String>) -> SurfaceId {
        let id = self.next_id;
        self.next_id += 1;

        let name = name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| Surface::default_name(id));
        let surface = Surface::new(id, name, default_quad(&self.viewport));
        info!("Created surface {} ({})", id, surface.name);
        self.surfaces.push(surface);

        if self.active_surface_id.is_none() {
            self.active_surface_id = Some(id);
        }
        id
    }

    /// Delete a surface. The last remaining surface can never be deleted.
    pub fn delete(&mut self, id: SurfaceId) -> MapperResult<()> {
        let idx = self
            .index_of(id)
            .ok_or_else(|| MapperError::invalid_op(format!("no surface with id {}", id)))?;

        if self.surfaces.len() <= 1 {
            return Err(MapperError::invalid_op("cannot delete the last surface"));
        }

        // Dropping the surface releases its texture and media
        let removed = self.surfaces.remove(idx);
        info!("Deleted surface {} ({})", id, removed.name);

        if self.active_surface_id == Some(id) {
            self.active_surface_id = self.surfaces.first().map(|s| s.id);
            self.selected_corner = None;
        }
        Ok(())
    }

    pub fn set_active(&mut self, id: SurfaceId) -> MapperResult<()> {
        if self.index_of(id).is_none() {
            return Err(MapperError::invalid_op(format!("no surface with id {}", id)));
        }
        if self.active_surface_id != Some(id) {
            debug!("Active surface -> {}", id);
        }
        self.active_surface_id = Some(id);
        Ok(())
    }

    /// Restore the active pointer from history, ignoring ids that no longer exist
    pub(crate) fn restore_active(&mut self, id: Option<SurfaceId>) {
        if let Some(id) = id {
            if self.index_of(id).is_some() {
                self.active_surface_id = Some(id);
            }
        }
    }

    fn index_of(&self, id: SurfaceId) -> Option<usize> {
        self.surfaces.iter().position(|s| s.id == id)
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.iter_mut().find(|s| s.id == id)
    }

    fn require_mut(&mut self, id: SurfaceId) -> MapperResult<&mut Surface> {
        self.get_mut(id)
            .ok_or_else(|| MapperError::invalid_op(format!("no surface with id {}", id)))
    }

    pub fn active(&self) -> MapperResult<&Surface> {
        self.active_surface_id
            .and_then(|id| self.get(id))
            .ok_or_else(|| MapperError::invalid_op("no active surface"))
    }

    pub fn active_mut(&mut self) -> MapperResult<&mut Surface> {
        match self.active_surface_id {
            Some(id) => self.require_mut(id),
            None => Err(MapperError::invalid_op("no active surface")),
        }
    }

    /// Move one corner. No clamping, ordering or convexity is enforced.
    pub fn mutate_corner(&mut self, id: SurfaceId, index: usize, point: Point) -> MapperResult<()> {
        if index > 3 {
            return Err(MapperError::invalid_op(format!(
                "corner index {} out of range (0-3)",
                index
            )));
        }
        let surface = self.require_mut(id)?;
        surface.corners[index] = point;
        Ok(())
    }

    pub fn set_corners(&mut self, id: SurfaceId, corners: Quad) -> MapperResult<()> {
        self.require_mut(id)?.corners = corners;
        Ok(())
    }

    pub fn set_appearance(&mut self, id: SurfaceId, change: Appearance) -> MapperResult<()> {
        self.require_mut(id)?.apply(change);
        Ok(())
    }

    /// Drop every surface (and its texture) and restart ids from zero
    pub(crate) fn reset(&mut self) {
        self.surfaces.clear();
        self.active_surface_id = None;
        self.selected_corner = None;
        self.next_id = 0;
    }
}
