//! A single corner-pinned surface

use serde::Serialize;
use std::time::Instant;

use crate::geometry::{radians_to_display_degrees, Point, Quad};
use crate::media::Media;
use crate::texture::Texture;

/// Stable surface identifier, never reused within a session
pub type SurfaceId = u32;

pub const DEFAULT_BRIGHTNESS: f32 = 0.0;
pub const DEFAULT_CONTRAST: f32 = 1.0;
pub const DEFAULT_OPACITY: f32 = 1.0;
pub const DEFAULT_ROTATION: f32 = 0.0;

/// One appearance parameter change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Appearance {
    /// Added to every color channel
    Brightness(f32),
    /// Scales color about the 0.5 midpoint
    Contrast(f32),
    /// Alpha multiplier
    Opacity(f32),
    /// Texture lookup rotation in radians about the UV center
    Rotation(f32),
}

/// A quad on screen with its media, texture and color settings
#[derive(Debug)]
pub struct Surface {
    pub id: SurfaceId,
    pub name: String,
    pub corners: Quad,
    pub media: Option<Media>,
    pub is_video: bool,
    pub brightness: f32,
    pub contrast: f32,
    pub opacity: f32,
    pub rotation: f32,
    texture: Texture,
    /// Last time a video texture was refreshed
    pub(crate) last_video_update: Option<Instant>,
    /// Sequence of the last uploaded video frame
    pub(crate) video_sequence: u64,
}

impl Surface {
    pub fn new(id: SurfaceId, name: String, corners: Quad) -> Self {
        Self {
            id,
            name,
            corners,
            media: None,
            is_video: false,
            brightness: DEFAULT_BRIGHTNESS,
            contrast: DEFAULT_CONTRAST,
            opacity: DEFAULT_OPACITY,
            rotation: DEFAULT_ROTATION,
            texture: Texture::new(),
            last_video_update: None,
            video_sequence: 0,
        }
    }

    /// Name given to unnamed surfaces
    pub fn default_name(id: SurfaceId) -> String {
        format!("Surface {}", id + 1)
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Split borrow for texture refresh
    pub(crate) fn media_and_texture(&mut self) -> (Option<&Media>, &mut Texture) {
        (self.media.as_ref(), &mut self.texture)
    }

    pub fn apply(&mut self, change: Appearance) {
        match change {
            Appearance::Brightness(v) => self.brightness = v,
            Appearance::Contrast(v) => self.contrast = v,
            Appearance::Opacity(v) => self.opacity = v,
            Appearance::Rotation(v) => self.rotation = v,
        }
    }

    /// Attach decoded media and upload its first frame
    pub fn attach_media(&mut self, media: Media, now: Instant) {
        self.is_video = media.is_video();
        media.upload_initial(&mut self.texture, now);
        self.last_video_update = Some(now);
        self.video_sequence = 0;
        self.media = Some(media);
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

/// Serializable view of a surface for the control UI
#[derive(Debug, Clone, Serialize)]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    pub name: String,
    pub corners: Vec<Point>,
    pub is_video: bool,
    pub has_media: bool,
    pub media: Option<String>,
    pub brightness: f32,
    pub contrast: f32,
    pub opacity: f32,
    pub rotation: f32,
    /// Rotation normalized into [0, 360) degrees for display
    pub rotation_degrees: f64,
    /// Handle of the surface's texture and its uploaded size
    pub texture: u64,
    pub texture_size: (u32, u32),
    pub texture_uploads: u64,
    pub active: bool,
}

impl SurfaceInfo {
    pub fn from_surface(surface: &Surface, active: bool) -> Self {
        Self {
            id: surface.id,
            name: surface.name.clone(),
            corners: surface.corners.to_vec(),
            is_video: surface.is_video,
            has_media: surface.has_media(),
            media: surface.media.as_ref().map(|m| m.describe()),
            brightness: surface.brightness,
            contrast: surface.contrast,
            opacity: surface.opacity,
            rotation: surface.rotation,
            rotation_degrees: radians_to_display_degrees(surface.rotation as f64),
            texture: surface.texture.handle(),
            texture_size: (surface.texture.width(), surface.texture.height()),
            texture_uploads: surface.texture.upload_count(),
            active,
        }
    }
}
