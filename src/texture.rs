//! Surface texture storage and sampling
//!
//! Each surface owns exactly one `Texture`. It is allocated when the surface
//! is created and released when the surface is dropped; it is deliberately
//! not `Clone`, so a texture can never be shared between surfaces.

use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TEXTURE_HANDLE: AtomicU64 = AtomicU64::new(1);

/// RGBA8 texture bound to one surface
#[derive(Debug)]
pub struct Texture {
    handle: u64,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    uploads: u64,
}

impl Texture {
    /// Allocate an empty texture
    pub fn new() -> Self {
        let handle = NEXT_TEXTURE_HANDLE.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Allocated texture #{}", handle);
        Self {
            handle,
            width: 0,
            height: 0,
            pixels: Vec::new(),
            uploads: 0,
        }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether any image data has been uploaded yet
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of uploads since allocation
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    /// Replace the texture contents, reusing the allocation when possible
    pub fn upload(&mut self, image: &RgbaImage) {
        self.width = image.width();
        self.height = image.height();
        self.pixels.clear();
        self.pixels.extend_from_slice(image.as_raw());
        self.uploads += 1;
    }

    /// Upload packed RGB24 data (camera frames)
    pub fn upload_rgb(&mut self, rgb: &[u8], width: u32, height: u32) {
        let count = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.reserve(count * 4);
        for px in rgb.chunks_exact(3).take(count) {
            self.pixels.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
        // Short frames are padded with opaque black
        self.pixels.resize(count * 4, 0);
        for alpha in self.pixels.iter_mut().skip(3).step_by(4) {
            *alpha = 255;
        }
        self.uploads += 1;
    }

    #[inline]
    fn texel(&self, x: usize, y: usize) -> [f32; 4] {
        let offset = (y * self.width as usize + x) * 4;
        match self.pixels.get(offset..offset + 4) {
            Some(p) => [
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
                p[3] as f32 / 255.0,
            ],
            None => [0.0, 0.0, 0.0, 0.0],
        }
    }

    /// Linear-filtered, clamp-to-edge sample at (u, v) in [0,1].
    ///
    /// v = 0 is the top row of the uploaded image. Coordinates outside the
    /// unit square clamp to the edge texels. Returns normalized RGBA.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        if self.is_empty() {
            return [0.0, 0.0, 0.0, 0.0];
        }

        let w = self.width as usize;
        let h = self.height as usize;

        // Texel centers sit at half-integer coordinates
        let x = (u * self.width as f32 - 0.5).clamp(0.0, (w - 1) as f32);
        let y = (v * self.height as f32 - 0.5).clamp(0.0, (h - 1) as f32);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);

        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let p00 = self.texel(x0, y0);
        let p10 = self.texel(x1, y0);
        let p01 = self.texel(x0, y1);
        let p11 = self.texel(x1, y1);

        let mut result = [0.0f32; 4];
        for c in 0..4 {
            result[c] = p00[c] * (1.0 - fx) * (1.0 - fy)
                + p10[c] * fx * (1.0 - fy)
                + p01[c] * (1.0 - fx) * fy
                + p11[c] * fx * fy;
        }
        result
    }
}

impl Default for Texture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        tracing::trace!("Released texture #{}", self.handle);
    }
}
