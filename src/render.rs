//! Corner-pin render pipeline
//!
//! Every frame, each surface with media is drawn as two triangles sharing the
//! 0-2 diagonal. Corners go pixel space -> NDC -> framebuffer, each corner
//! carries a fixed UV, and UVs are interpolated linearly across each
//! triangle. This is not a projective mapping: under strong skew straight
//! lines in the texture bend at the diagonal. The fragment stage applies UV
//! rotation, brightness, contrast and opacity, then blends with
//! src-alpha / one-minus-src-alpha.
//!
//! Rasterization runs on the CPU with rows processed in parallel.

use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::geometry::{Quad, Viewport};
use crate::snow::SnowField;
use crate::state::ApplicationState;
use crate::surface::Surface;
use crate::texture::Texture;

/// Two triangles sharing the 0-2 diagonal
pub const QUAD_INDICES: [usize; 6] = [0, 1, 2, 0, 2, 3];

/// Fixed UV per corner slot, in corner order
pub const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

const CLEAR_COLOR: [u8; 4] = [0, 0, 0, 255];

/// RGBA8 framebuffer at device-pixel resolution
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Match the framebuffer to the viewport; safe to call every frame
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.pixels = vec![0; width as usize * height as usize * 4];
        }
    }

    pub fn clear(&mut self) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&CLEAR_COLOR);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.pixels[offset..offset + 4]);
        out
    }

    /// Alpha-blended filled circle (used by overlays)
    pub fn fill_circle(&mut self, cx: f32, cy: f32, r: f32, color: [f32; 4]) {
        if r <= 0.0 {
            return;
        }
        let x0 = (cx - r).floor().max(0.0) as i64;
        let y0 = (cy - r).floor().max(0.0) as i64;
        let x1 = ((cx + r).ceil() as i64).min(self.width as i64);
        let y1 = ((cy + r).ceil() as i64).min(self.height as i64);
        let stride = self.width as usize * 4;

        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r * r {
                    let offset = y as usize * stride + x as usize * 4;
                    blend_pixel(&mut self.pixels[offset..offset + 4], color);
                }
            }
        }
    }

    /// Encode as JPEG (alpha is dropped)
    pub fn to_jpeg(&self, quality: u8) -> anyhow::Result<Vec<u8>> {
        use image::{ImageBuffer, ImageOutputFormat, Rgb};
        use std::io::Cursor;

        let rgb: Vec<u8> = self
            .pixels
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect();
        let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow::anyhow!("Failed to create image buffer"))?;

        let mut jpeg_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg_data), ImageOutputFormat::Jpeg(quality))?;
        Ok(jpeg_data)
    }
}

/// Per-surface fragment parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderParams {
    pub brightness: f32,
    pub contrast: f32,
    pub opacity: f32,
    pub rotation: f32,
}

impl ShaderParams {
    pub fn from_surface(surface: &Surface) -> Self {
        Self {
            brightness: surface.brightness,
            contrast: surface.contrast,
            opacity: surface.opacity,
            rotation: surface.rotation,
        }
    }
}

/// Rotate a UV about the texture center (0.5, 0.5)
#[inline]
pub fn rotate_uv(uv: [f32; 2], angle: f32) -> [f32; 2] {
    let (s, c) = angle.sin_cos();
    let x = uv[0] - 0.5;
    let y = uv[1] - 0.5;
    [x * c - y * s + 0.5, x * s + y * c + 0.5]
}

/// Apply the color stage to a sampled texel, clamped to [0, 1]
#[inline]
pub fn grade(texel: [f32; 4], params: &ShaderParams) -> [f32; 4] {
    let mut out = texel;
    for channel in out.iter_mut().take(3) {
        let bright = *channel + params.brightness;
        *channel = ((bright - 0.5) * params.contrast + 0.5).clamp(0.0, 1.0);
    }
    out[3] = (out[3] * params.opacity).clamp(0.0, 1.0);
    out
}

/// Fragment stage: rotated texture lookup followed by color grading
#[inline]
pub fn shade(texture: &Texture, uv: [f32; 2], params: &ShaderParams) -> [f32; 4] {
    let uv = if params.rotation != 0.0 {
        rotate_uv(uv, params.rotation)
    } else {
        uv
    };
    grade(texture.sample(uv[0], uv[1]), params)
}

/// src-alpha / one-minus-src-alpha blend into an RGBA8 pixel
#[inline]
fn blend_pixel(dst: &mut [u8], src: [f32; 4]) {
    let a = src[3];
    for c in 0..4 {
        let d = dst[c] as f32 / 255.0;
        let out = src[c] * a + d * (1.0 - a);
        dst[c] = (out * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

/// A vertex in framebuffer pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
}

/// Build the four vertices of a surface for a framebuffer of the given size
pub fn surface_vertices(corners: &Quad, viewport: &Viewport, fb_w: u32, fb_h: u32) -> [Vertex; 4] {
    let mut out = [Vertex {
        pos: [0.0, 0.0],
        uv: [0.0, 0.0],
    }; 4];
    for (i, corner) in corners.iter().enumerate() {
        let (nx, ny) = viewport.to_ndc(*corner);
        out[i] = Vertex {
            pos: [
                ((nx + 1.0) * 0.5 * fb_w as f64) as f32,
                ((1.0 - ny) * 0.5 * fb_h as f64) as f32,
            ],
            uv: QUAD_UVS[i],
        };
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    v: [Vertex; 3],
    area: f32,
}

impl Triangle {
    fn new(a: Vertex, b: Vertex, c: Vertex) -> Option<Self> {
        let area = edge(a.pos, b.pos, c.pos);
        // Collapsed corners (triangle presets) produce zero-area halves
        if area.abs() < 1e-6 {
            return None;
        }
        Some(Self { v: [a, b, c], area })
    }

    /// Interpolated UV at `p`, or None if `p` is outside
    #[inline]
    fn uv_at(&self, p: [f32; 2]) -> Option<[f32; 2]> {
        let w0 = edge(self.v[1].pos, self.v[2].pos, p) / self.area;
        let w1 = edge(self.v[2].pos, self.v[0].pos, p) / self.area;
        let w2 = edge(self.v[0].pos, self.v[1].pos, p) / self.area;
        if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
            return None;
        }
        Some([
            w0 * self.v[0].uv[0] + w1 * self.v[1].uv[0] + w2 * self.v[2].uv[0],
            w0 * self.v[0].uv[1] + w1 * self.v[1].uv[1] + w2 * self.v[2].uv[1],
        ])
    }
}

#[inline]
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Rasterize one textured quad into the frame. Returns covered pixel count.
pub fn draw_quad(frame: &mut Frame, verts: &[Vertex; 4], texture: &Texture, params: &ShaderParams) -> usize {
    let triangles: Vec<Triangle> = QUAD_INDICES
        .chunks_exact(3)
        .filter_map(|idx| Triangle::new(verts[idx[0]], verts[idx[1]], verts[idx[2]]))
        .collect();
    if triangles.is_empty() {
        return 0;
    }

    let min_x = verts.iter().map(|v| v.pos[0]).fold(f32::INFINITY, f32::min);
    let max_x = verts.iter().map(|v| v.pos[0]).fold(f32::NEG_INFINITY, f32::max);
    let min_y = verts.iter().map(|v| v.pos[1]).fold(f32::INFINITY, f32::min);
    let max_y = verts.iter().map(|v| v.pos[1]).fold(f32::NEG_INFINITY, f32::max);

    let x0 = min_x.floor().max(0.0) as usize;
    let x1 = (max_x.ceil().max(0.0) as usize).min(frame.width as usize);
    let y0 = min_y.floor().max(0.0) as usize;
    let y1 = (max_y.ceil().max(0.0) as usize).min(frame.height as usize);
    if x0 >= x1 || y0 >= y1 {
        return 0;
    }

    let stride = frame.width as usize * 4;
    frame
        .pixels
        .par_chunks_mut(stride)
        .enumerate()
        .skip(y0)
        .take(y1 - y0)
        .map(|(y, row)| {
            let py = y as f32 + 0.5;
            let mut covered = 0;
            for x in x0..x1 {
                let p = [x as f32 + 0.5, py];
                // A pixel on the shared diagonal belongs to the first triangle only
                if let Some(uv) = triangles.iter().find_map(|t| t.uv_at(p)) {
                    let color = shade(texture, uv, params);
                    blend_pixel(&mut row[x * 4..x * 4 + 4], color);
                    covered += 1;
                }
            }
            covered
        })
        .sum()
}

/// Counters from the most recent frame
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RenderStats {
    pub frames: u64,
    pub surfaces_drawn: usize,
    pub texture_uploads: u64,
    pub pixels_covered: usize,
}

/// Draws the surface list and the overlay into a frame
#[derive(Debug)]
pub struct Renderer {
    video_refresh: Duration,
    stats: RenderStats,
}

impl Renderer {
    pub fn new(video_refresh: Duration) -> Self {
        Self {
            video_refresh,
            stats: RenderStats::default(),
        }
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Refresh video textures, at most once per `video_refresh` per surface
    fn refresh_video_textures(&mut self, state: &mut ApplicationState, now: Instant) {
        for surface in state.surfaces_mut() {
            if !surface.is_video || surface.media.is_none() {
                continue;
            }
            let due = match surface.last_video_update {
                Some(last) => now.saturating_duration_since(last) > self.video_refresh,
                None => true,
            };
            if !due {
                continue;
            }
            let mut sequence = surface.video_sequence;
            let uploaded = {
                let (media, texture) = surface.media_and_texture();
                media.map(|m| m.refresh(texture, now, &mut sequence)).unwrap_or(false)
            };
            surface.video_sequence = sequence;
            surface.last_video_update = Some(now);
            if uploaded {
                self.stats.texture_uploads += 1;
            }
        }
    }

    pub fn render(&mut self, state: &mut ApplicationState, snow: &SnowField, frame: &mut Frame, now: Instant) {
        self.refresh_video_textures(state, now);

        let viewport = *state.viewport();
        let (fb_w, fb_h) = viewport.framebuffer_size();
        frame.resize(fb_w, fb_h);
        frame.clear();

        let mut drawn = 0;
        let mut covered = 0;
        for surface in state.surfaces() {
            // No media (or no frame decoded yet): no draw, no texture bind
            if surface.media.is_none() || surface.texture().is_empty() {
                continue;
            }
            let verts = surface_vertices(&surface.corners, &viewport, fb_w, fb_h);
            let params = ShaderParams::from_surface(surface);
            covered += draw_quad(frame, &verts, surface.texture(), &params);
            drawn += 1;
        }

        // Blending for surfaces ends here; the overlay composites on top
        snow.draw(frame, &viewport);

        self.stats.frames += 1;
        self.stats.surfaces_drawn = drawn;
        self.stats.pixels_covered = covered;
        trace!("Rendered frame {}: {} surfaces", self.stats.frames, drawn);
    }
}
